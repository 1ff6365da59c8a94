//! WSDL introspection.
//!
//! The DMSvr WSDL exposes several port bindings over one shared interface
//! definition, and the operation-to-binding mapping is not static across
//! deployments. [`WsdlIndex::parse`] flattens the document into the port
//! list with each port's declared operation set; resolution scans the
//! ports until one declares the wanted operation.

use std::collections::HashSet;

use url::Url;

use crate::error::{DmsError, DmsResult};
use crate::xml::{xml_attr, xml_blocks};

/// One service port: a binding plus its endpoint address.
#[derive(Debug, Clone)]
pub struct ServicePort {
    /// Port name, e.g. `BasicHttpBinding_IDMSvc`.
    pub name: String,
    /// Endpoint URL from the port's `address` element.
    pub endpoint: String,
    /// Operations the underlying binding declares.
    pub operations: HashSet<String>,
}

impl ServicePort {
    /// Interface name used in SOAPAction values, derived from the port
    /// name's final segment (`BasicHttpBinding_IDMSvc` → `IDMSvc`).
    pub fn interface(&self) -> &str {
        self.name.rsplit('_').next().unwrap_or(&self.name)
    }
}

/// Parsed view of one WSDL document.
#[derive(Debug, Clone, Default)]
pub struct WsdlIndex {
    ports: Vec<ServicePort>,
}

impl WsdlIndex {
    /// Parse a WSDL document into its service ports.
    ///
    /// Operations are taken from the `binding` elements (one per port),
    /// endpoints from the `address` element of each `service/port`. A
    /// document with no usable ports is a parse error — nothing could ever
    /// be dispatched through it.
    pub fn parse(wsdl: &str) -> DmsResult<Self> {
        let mut bindings: Vec<(String, HashSet<String>)> = Vec::new();
        for block in xml_blocks(wsdl, "binding") {
            // Service blocks also contain <port binding="..."/> elements;
            // only element blocks with their own operations are bindings.
            let Some(name) = xml_attr(&block, "name") else {
                continue;
            };
            let ops: HashSet<String> = xml_blocks(&block, "operation")
                .iter()
                .filter_map(|op| xml_attr(op, "name"))
                .collect();
            if !ops.is_empty() {
                bindings.push((name, ops));
            }
        }

        let mut ports = Vec::new();
        for service in xml_blocks(wsdl, "service") {
            for port in xml_blocks(&service, "port") {
                let Some(name) = xml_attr(&port, "name") else {
                    continue;
                };
                let Some(endpoint) = xml_blocks(&port, "address")
                    .first()
                    .and_then(|a| xml_attr(a, "location"))
                else {
                    continue;
                };
                if Url::parse(&endpoint).is_err() {
                    log::warn!("wsdl: port {name} has unparsable address {endpoint}, skipped");
                    continue;
                }
                let binding_ref = xml_attr(&port, "binding").unwrap_or_default();
                let binding_local = binding_ref
                    .rsplit_once(':')
                    .map(|(_, l)| l)
                    .unwrap_or(&binding_ref);
                let operations = bindings
                    .iter()
                    .find(|(b, _)| b == binding_local || b == &name)
                    .map(|(_, ops)| ops.clone())
                    .unwrap_or_default();
                ports.push(ServicePort {
                    name,
                    endpoint,
                    operations,
                });
            }
        }

        if ports.is_empty() {
            return Err(DmsError::parse("wsdl: no service ports found"));
        }
        Ok(Self { ports })
    }

    /// First port whose binding declares `operation`, in document order.
    pub fn resolve(&self, operation: &str) -> Option<&ServicePort> {
        self.ports
            .iter()
            .find(|p| p.operations.contains(operation))
    }

    pub fn ports(&self) -> &[ServicePort] {
        &self.ports
    }
}
