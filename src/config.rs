//! Gateway configuration.
//!
//! Constructed once by the host and injected into [`SoapGateway`]
//! (`crate::gateway::SoapGateway`) — no module-level globals, no
//! import-time environment reads.

use serde::{Deserialize, Serialize};

/// Connection settings for one DMSvr deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// URL of the WSDL document describing the service bindings.
    pub wsdl_url: String,
    /// Target library name, e.g. `RTA_MAIN`. Doubles as the login context.
    pub library: String,
    /// System account used for [`LoginKind::System`](crate::types::LoginKind).
    pub username: String,
    pub password: String,
    /// Identifier of the hierarchy root folder.
    pub root_folder_id: String,
    /// Per-call timeout; every remote call is bounded by this.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Accept self-signed certificates (lab deployments).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

impl GatewayConfig {
    /// Location string the server expects on profile writes.
    pub(crate) fn recent_location(&self) -> String {
        format!("DOCSOPEN!L\\{}", self.library)
    }
}
