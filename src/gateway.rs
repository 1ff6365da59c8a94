//! SOAP gateway: binding resolution and dispatch for every remote call.
//!
//! [`SoapGateway`] fetches the WSDL once, resolves each operation to the
//! port binding that declares it (memoized for the process lifetime, a pure
//! performance optimisation), and funnels every RPC through one bounded
//! `send` path with fault extraction and result-code classification.
//!
//! The [`DmsGateway`] trait is the seam the higher layers are written
//! against; tests drive them with in-process fakes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, trace, warn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::config::GatewayConfig;
use crate::error::{classify_remote, DmsError, DmsResult};
use crate::types::{
    ContentHandle, LinkRecord, LoginKind, RawResult, ResultSetId, SearchRequest, SessionToken,
    StreamHandle, StreamMode, TrusteeEntry, TrusteeKind,
};
use crate::wsdl::WsdlIndex;
use crate::xml::{xml_block, xml_text, xml_text_all, xml_unescape, xml_escape};

// ─── Wire constants ──────────────────────────────────────────────────

const NS_ENVELOPE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const NS_TEMPURI: &str = "http://tempuri.org/";
const NS_ARRAYS: &str = "http://schemas.microsoft.com/2003/10/Serialization/Arrays";
const NS_SERIAL: &str = "http://schemas.datacontract.org/2004/07/OpenText.DMSvr.Serializable";

/// Fixed transfer chunk size for stream reads.
pub const READ_CHUNK_BYTES: u32 = 65536;
/// Where-used enumerations are fetched in one bounded batch.
const WHERE_USED_BATCH: u32 = 100;

// ─── Gateway seam ────────────────────────────────────────────────────

/// Typed remote operations consumed by the adapter's higher layers.
///
/// Library scoping (`%TARGET_LIBRARY`, signature libraries) is supplied by
/// the implementation; callers pass only operation-specific properties.
#[async_trait]
pub trait DmsGateway: Send + Sync {
    /// Log in and obtain a session token. Fatal for the request on failure.
    async fn login(&self, kind: LoginKind) -> DmsResult<SessionToken>;

    /// Open a server-side result set. `Ok(None)` means the search matched
    /// nothing (no result set was created).
    async fn search(
        &self,
        session: &SessionToken,
        request: &SearchRequest,
    ) -> DmsResult<Option<ResultSetId>>;

    /// Fetch one page of a result set.
    async fn fetch_rows(
        &self,
        result_set: &ResultSetId,
        requested_rows: u32,
        starting_row: u32,
    ) -> DmsResult<RawResult>;

    /// Release a result set. Best-effort: failures are logged, never
    /// escalated.
    async fn release_result_set(&self, result_set: &ResultSetId);

    /// Open document content for reading; resolves the version file name
    /// when the server supplies one.
    async fn open_content(&self, session: &SessionToken, doc_id: &str) -> DmsResult<ContentHandle>;

    /// Open document content for writing a specific version.
    async fn open_write_content(
        &self,
        session: &SessionToken,
        doc_id: &str,
        version_id: &str,
    ) -> DmsResult<ContentHandle>;

    /// Open a stream cursor over a content handle.
    async fn open_stream(
        &self,
        session: &SessionToken,
        content: &ContentHandle,
        mode: StreamMode,
    ) -> DmsResult<StreamHandle>;

    /// Read the next chunk. `Ok(None)` signals end of stream (empty payload
    /// or non-zero result code from the server).
    async fn read_chunk(&self, stream: &StreamHandle) -> DmsResult<Option<Vec<u8>>>;

    async fn write_chunk(&self, stream: &StreamHandle, data: &[u8]) -> DmsResult<()>;

    async fn commit_stream(&self, stream: &StreamHandle) -> DmsResult<()>;

    /// Release any server-side object handle (content, stream, collection,
    /// enumeration).
    async fn release_object(&self, object_id: &str) -> DmsResult<()>;

    /// Create an object; returns the reply's return-property pairs.
    async fn create_object(
        &self,
        session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<Vec<(String, String)>>;

    async fn update_object(
        &self,
        session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<()>;

    async fn delete_object(
        &self,
        session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<()>;

    /// Replace the trustee list of an object.
    async fn set_trustees(
        &self,
        session: &SessionToken,
        object_id: &str,
        trustees: &[TrusteeEntry],
    ) -> DmsResult<()>;

    /// Read back the trustee list of an object.
    async fn get_trustees(
        &self,
        session: &SessionToken,
        object_id: &str,
    ) -> DmsResult<Vec<TrusteeEntry>>;

    /// Every container reference to `object_id`, store-wide.
    async fn where_used(
        &self,
        session: &SessionToken,
        object_id: &str,
    ) -> DmsResult<Vec<LinkRecord>>;

    /// Single-value lookup against a server view (`maxRows` 1).
    async fn lookup_single(
        &self,
        session: &SessionToken,
        view: &str,
        criteria_field: &str,
        return_field: &str,
        value: &str,
    ) -> DmsResult<Option<String>>;

    /// Current version id of a document, `"0"` when undeterminable.
    async fn current_version(&self, session: &SessionToken, doc_id: &str) -> DmsResult<String>;
}

// ─── SOAP implementation ─────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ResolvedOp {
    endpoint: String,
    action: String,
}

/// HTTP SOAP gateway against one DMSvr deployment.
pub struct SoapGateway {
    http: reqwest::Client,
    config: GatewayConfig,
    wsdl: tokio::sync::RwLock<Option<Arc<WsdlIndex>>>,
    /// Process-lifetime operation→binding memo. The mapping is stable
    /// within a deployment; correctness does not depend on this cache.
    resolved: RwLock<HashMap<String, ResolvedOp>>,
}

impl SoapGateway {
    pub fn new(config: GatewayConfig) -> DmsResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(15))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| DmsError::connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            wsdl: tokio::sync::RwLock::new(None),
            resolved: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn wsdl_index(&self) -> DmsResult<Arc<WsdlIndex>> {
        if let Some(idx) = self.wsdl.read().await.as_ref() {
            return Ok(idx.clone());
        }
        debug!("fetching WSDL from {}", self.config.wsdl_url);
        let text = self
            .http
            .get(&self.config.wsdl_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| DmsError::connection(format!("WSDL fetch failed: {e}")))?
            .text()
            .await?;
        let idx = Arc::new(WsdlIndex::parse(&text)?);
        *self.wsdl.write().await = Some(idx.clone());
        Ok(idx)
    }

    /// Resolve an operation to its endpoint + SOAPAction, memoized.
    async fn resolve(&self, operation: &str) -> DmsResult<ResolvedOp> {
        if let Some(hit) = self
            .resolved
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(operation)
        {
            return Ok(hit.clone());
        }
        let idx = self.wsdl_index().await?;
        let port = idx
            .resolve(operation)
            .ok_or_else(|| DmsError::operation_unavailable(operation))?;
        let entry = ResolvedOp {
            endpoint: port.endpoint.clone(),
            action: format!("{NS_TEMPURI}{}/{operation}", port.interface()),
        };
        debug!("resolved operation {operation} to port {}", port.name);
        self.resolved
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(operation.to_string(), entry.clone());
        Ok(entry)
    }

    /// Send one operation envelope and return the response body.
    async fn call(&self, operation: &str, inner: &str) -> DmsResult<String> {
        let target = self.resolve(operation).await?;
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{NS_ENVELOPE}"><s:Body><{operation} xmlns="{NS_TEMPURI}">{inner}</{operation}></s:Body></s:Envelope>"#
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"));
        headers.insert(
            "SOAPAction",
            HeaderValue::from_str(&format!("\"{}\"", target.action))
                .map_err(|e| DmsError::other(format!("invalid SOAPAction: {e}")))?,
        );

        trace!("{operation} request ({} bytes)", body.len());
        let resp = self
            .http
            .post(&target.endpoint)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        trace!("{operation} response: status={status}, {} bytes", text.len());

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DmsError::auth(format!("{operation}: HTTP {status}")));
        }
        if !status.is_success() {
            let fault = extract_fault(&text)
                .unwrap_or_else(|| format!("HTTP {} with no fault detail", status.as_u16()));
            return Err(classify_remote(-1, &format!("{operation}: {fault}")));
        }
        if text.contains(":Fault>") || text.contains("<Fault>") {
            let fault = extract_fault(&text).unwrap_or_else(|| "unrecognised SOAP fault".into());
            return Err(classify_remote(-1, &format!("{operation}: {fault}")));
        }
        Ok(text)
    }

    /// Check the application result code of a reply.
    fn check_result(operation: &str, reply: &str, accept: &[i32]) -> DmsResult<()> {
        let code = result_code(reply);
        if accept.contains(&code) {
            return Ok(());
        }
        let detail = xml_text(reply, "errorDoc")
            .map(|t| xml_unescape(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("result code {code}"));
        Err(classify_remote(code, &format!("{operation}: {detail}")))
    }
}

// ─── Reply parsing helpers ───────────────────────────────────────────

fn result_code(reply: &str) -> i32 {
    xml_text(reply, "resultCode")
        .and_then(|t| t.trim().parse().ok())
        .unwrap_or(0)
}

fn extract_fault(body: &str) -> Option<String> {
    xml_text(body, "faultstring")
        .or_else(|| xml_text(body, "Text"))
        .or_else(|| xml_text(body, "Message"))
        .map(|t| xml_unescape(&t))
        .filter(|t| !t.is_empty())
}

/// Zip a `propertyNames`/`propertyValues` pair into (name, value) pairs.
fn property_pairs(container: &str) -> Vec<(String, String)> {
    let names = xml_block(container, "propertyNames")
        .map(|b| xml_text_all(&b, "string"))
        .unwrap_or_default();
    let values = xml_block(container, "propertyValues")
        .map(|b| xml_text_all(&b, "anyType"))
        .unwrap_or_default();
    names
        .into_iter()
        .zip(values)
        .map(|(n, v)| (n, xml_unescape(&v)))
        .collect()
}

fn pair_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

// ─── Envelope fragment builders ──────────────────────────────────────

fn string_array(items: &[&str]) -> String {
    items
        .iter()
        .map(|s| format!("<a:string>{}</a:string>", xml_escape(s)))
        .collect()
}

fn int_array(items: &[i32]) -> String {
    items.iter().map(|i| format!("<a:int>{i}</a:int>")).collect()
}

fn any_array(items: &[&str]) -> String {
    items
        .iter()
        .map(|s| {
            format!(
                r#"<a:anyType i:type="x:string" xmlns:i="http://www.w3.org/2001/XMLSchema-instance" xmlns:x="http://www.w3.org/2001/XMLSchema">{}</a:anyType>"#,
                xml_escape(s)
            )
        })
        .collect()
}

fn property_set(properties: &[(String, String)]) -> String {
    let names: Vec<&str> = properties.iter().map(|(n, _)| n.as_str()).collect();
    let values: Vec<&str> = properties.iter().map(|(_, v)| v.as_str()).collect();
    format!(
        r#"<properties><propertyCount>{count}</propertyCount><propertyNames xmlns:a="{NS_ARRAYS}">{names}</propertyNames><propertyValues xmlns:a="{NS_ARRAYS}">{values}</propertyValues></properties>"#,
        count = properties.len(),
        names = string_array(&names),
        values = any_array(&values),
    )
}

fn criteria_set(criteria: &[(String, String)]) -> String {
    let names: Vec<&str> = criteria.iter().map(|(n, _)| n.as_str()).collect();
    let values: Vec<&str> = criteria.iter().map(|(_, v)| v.as_str()).collect();
    format!(
        r#"<criteria><criteriaCount>{count}</criteriaCount><criteriaNames xmlns:a="{NS_ARRAYS}">{names}</criteriaNames><criteriaValues xmlns:a="{NS_ARRAYS}">{values}</criteriaValues></criteria>"#,
        count = criteria.len(),
        names = string_array(&names),
        values = string_array(&values),
    )
}

// ─── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl DmsGateway for SoapGateway {
    async fn login(&self, kind: LoginKind) -> DmsResult<SessionToken> {
        let (username, password) = match &kind {
            LoginKind::System => (self.config.username.clone(), self.config.password.clone()),
            LoginKind::User { username, password } => (username.clone(), password.clone()),
        };
        let inner = format!(
            r#"<call><authen>1</authen><dstIn></dstIn><loginInfo xmlns:a="{NS_SERIAL}"><a:DMSvrLoginInfo><a:loginContext>{context}</a:loginContext><a:network>0</a:network><a:password>{password}</a:password><a:username>{username}</a:username></a:DMSvrLoginInfo></loginInfo></call>"#,
            context = xml_escape(&self.config.library),
            password = xml_escape(&password),
            username = xml_escape(&username),
        );
        let reply = self.call("LoginSvr5", &inner).await?;

        let code = result_code(&reply);
        let dst = xml_text(&reply, "DSTOut").unwrap_or_default();
        if code != 0 || dst.is_empty() {
            let detail = xml_text(&reply, "errorDoc").unwrap_or_else(|| format!("result code {code}"));
            return Err(DmsError::auth(format!("login rejected for '{username}': {detail}")));
        }
        debug!("login succeeded for '{username}'");
        Ok(SessionToken::new(xml_unescape(&dst)))
    }

    async fn search(
        &self,
        session: &SessionToken,
        request: &SearchRequest,
    ) -> DmsResult<Option<ResultSetId>> {
        let ret: Vec<&str> = request.return_properties.iter().map(|s| s.as_str()).collect();
        let sort = match &request.sort_by {
            Some((prop, ascending)) => format!(
                r#"<sortProps><propertyCount>1</propertyCount><propertyNames xmlns:a="{NS_ARRAYS}">{name}</propertyNames><propertyFlags xmlns:a="{NS_ARRAYS}">{flag}</propertyFlags></sortProps>"#,
                name = string_array(&[prop.as_str()]),
                flag = int_array(&[if *ascending { 1 } else { 2 }]),
            ),
            None => String::new(),
        };
        let inner = format!(
            r#"<call><dstIn>{dst}</dstIn><objectType>{object_type}</objectType><signature>{criteria}<libraries xmlns:a="{NS_ARRAYS}">{library}</libraries><maxRows>{max_rows}</maxRows><retProperties xmlns:a="{NS_ARRAYS}">{ret}</retProperties>{sort}</signature></call>"#,
            dst = xml_escape(session.as_str()),
            object_type = xml_escape(&request.object_type),
            criteria = criteria_set(&request.criteria),
            library = string_array(&[self.config.library.as_str()]),
            max_rows = request.max_rows,
            ret = string_array(&ret),
        );
        let reply = self.call("Search", &inner).await?;
        Self::check_result("Search", &reply, &[0])?;

        Ok(xml_text(&reply, "resultSetID")
            .filter(|id| !id.is_empty())
            .map(ResultSetId))
    }

    async fn fetch_rows(
        &self,
        result_set: &ResultSetId,
        requested_rows: u32,
        starting_row: u32,
    ) -> DmsResult<RawResult> {
        // Wide-char and narrow variants of the same RPC; which one exists
        // depends on the deployment, so resolution decides.
        let operation = if self.resolve("GetDataW").await.is_ok() {
            "GetDataW"
        } else {
            "GetData"
        };
        let inner = format!(
            r#"<call><requestedRows>{requested_rows}</requestedRows><resultSetID>{id}</resultSetID><startingRow>{starting_row}</startingRow></call>"#,
            id = xml_escape(&result_set.0),
        );
        let reply = self.call(operation, &inner).await?;
        Self::check_result(operation, &reply, &[0, 1])?;

        if let Some(encoded) = xml_text(&reply, "resultBuffer").filter(|b| !b.is_empty()) {
            let compact: String = encoded.split_whitespace().collect();
            let bytes = BASE64
                .decode(compact.as_bytes())
                .map_err(|e| DmsError::parse(format!("{operation}: bad resultBuffer: {e}")))?;
            return Ok(RawResult::Buffer(bytes));
        }

        let rows: Vec<Vec<String>> = crate::xml::xml_blocks(&reply, "rowNode")
            .iter()
            .map(|row| {
                xml_text_all(row, "anyType")
                    .iter()
                    .map(|v| xml_unescape(v))
                    .collect()
            })
            .collect();
        if rows.is_empty() {
            Ok(RawResult::Empty)
        } else {
            Ok(RawResult::Rows(rows))
        }
    }

    async fn release_result_set(&self, result_set: &ResultSetId) {
        let inner = format!(
            "<call><resultSetID>{}</resultSetID></call>",
            xml_escape(&result_set.0)
        );
        if let Err(e) = self.call("ReleaseData", &inner).await {
            warn!("ReleaseData for {} failed: {e}", result_set.0);
        }
        if let Err(e) = self.release_object(&result_set.0).await {
            warn!("ReleaseObject for result set {} failed: {e}", result_set.0);
        }
    }

    async fn open_content(&self, session: &SessionToken, doc_id: &str) -> DmsResult<ContentHandle> {
        let criteria = vec![
            ("%TARGET_LIBRARY".to_string(), self.config.library.clone()),
            ("%DOCUMENT_NUMBER".to_string(), doc_id.to_string()),
            ("%VERSION_ID".to_string(), "%VERSION_TO_INDEX".to_string()),
        ];
        let inner = format!(
            "<call>{criteria}<dstIn>{dst}</dstIn></call>",
            criteria = criteria_set(&criteria),
            dst = xml_escape(session.as_str()),
        );
        let reply = self.call("GetDocSvr3", &inner).await?;
        Self::check_result("GetDocSvr3", &reply, &[0])?;

        let id = xml_text(&reply, "getDocID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DmsError::not_found(format!("document {doc_id} has no content")))?;

        let file_name = xml_block(&reply, "docProperties")
            .map(|block| property_pairs(&block))
            .and_then(|pairs| pair_value(&pairs, "%VERSION_FILE_NAME").map(str::to_string))
            .filter(|n| !n.is_empty());

        Ok(ContentHandle { id, file_name })
    }

    async fn open_write_content(
        &self,
        session: &SessionToken,
        doc_id: &str,
        version_id: &str,
    ) -> DmsResult<ContentHandle> {
        let inner = format!(
            "<call><documentNumber>{doc}</documentNumber><dstIn>{dst}</dstIn><libraryName>{lib}</libraryName><versionID>{ver}</versionID></call>",
            doc = xml_escape(doc_id),
            dst = xml_escape(session.as_str()),
            lib = xml_escape(&self.config.library),
            ver = xml_escape(version_id),
        );
        let reply = self.call("PutDoc", &inner).await?;
        Self::check_result("PutDoc", &reply, &[0])?;

        let id = xml_text(&reply, "putDocID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DmsError::parse(format!("PutDoc returned no handle for {doc_id}")))?;
        Ok(ContentHandle { id, file_name: None })
    }

    async fn open_stream(
        &self,
        session: &SessionToken,
        content: &ContentHandle,
        mode: StreamMode,
    ) -> DmsResult<StreamHandle> {
        let operation = match mode {
            StreamMode::Read => "GetReadStream",
            StreamMode::Write => "GetWriteStream",
        };
        let inner = format!(
            "<call><contentID>{content}</contentID><dstIn>{dst}</dstIn></call>",
            content = xml_escape(&content.id),
            dst = xml_escape(session.as_str()),
        );
        let reply = self.call(operation, &inner).await?;
        Self::check_result(operation, &reply, &[0])?;

        let id = xml_text(&reply, "streamID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DmsError::parse(format!("{operation} returned no stream handle")))?;
        Ok(StreamHandle { id })
    }

    async fn read_chunk(&self, stream: &StreamHandle) -> DmsResult<Option<Vec<u8>>> {
        let inner = format!(
            "<call><requestedBytes>{READ_CHUNK_BYTES}</requestedBytes><streamID>{id}</streamID></call>",
            id = xml_escape(&stream.id),
        );
        let reply = self.call("ReadStream", &inner).await?;

        // Non-zero result code doubles as the EOF signal on this RPC.
        if result_code(&reply) != 0 {
            return Ok(None);
        }
        let encoded = xml_text(&reply, "streamBuffer").unwrap_or_default();
        if encoded.is_empty() {
            return Ok(None);
        }
        let compact: String = encoded.split_whitespace().collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| DmsError::parse(format!("ReadStream: bad streamBuffer: {e}")))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes))
    }

    async fn write_chunk(&self, stream: &StreamHandle, data: &[u8]) -> DmsResult<()> {
        let inner = format!(
            r#"<call><streamData xmlns:a="{NS_SERIAL}"><a:bufferSize>{size}</a:bufferSize><a:streamBuffer>{buf}</a:streamBuffer></streamData><streamID>{id}</streamID></call>"#,
            size = data.len(),
            buf = BASE64.encode(data),
            id = xml_escape(&stream.id),
        );
        let reply = self.call("WriteStream", &inner).await?;
        Self::check_result("WriteStream", &reply, &[0])
    }

    async fn commit_stream(&self, stream: &StreamHandle) -> DmsResult<()> {
        let inner = format!(
            "<call><flags>0</flags><streamID>{id}</streamID></call>",
            id = xml_escape(&stream.id),
        );
        let reply = self.call("CommitStream", &inner).await?;
        Self::check_result("CommitStream", &reply, &[0])
    }

    async fn release_object(&self, object_id: &str) -> DmsResult<()> {
        let inner = format!(
            "<call><objectID>{id}</objectID></call>",
            id = xml_escape(object_id),
        );
        let reply = self.call("ReleaseObject", &inner).await?;
        Self::check_result("ReleaseObject", &reply, &[0])
    }

    async fn create_object(
        &self,
        session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<Vec<(String, String)>> {
        let mut props = vec![("%TARGET_LIBRARY".to_string(), self.config.library.clone())];
        props.extend_from_slice(properties);
        let inner = format!(
            "<call><dstIn>{dst}</dstIn><objectType>{object_type}</objectType>{props}</call>",
            dst = xml_escape(session.as_str()),
            object_type = xml_escape(object_type),
            props = property_set(&props),
        );
        let reply = self.call("CreateObject", &inner).await?;
        Self::check_result("CreateObject", &reply, &[0])?;

        Ok(xml_block(&reply, "retProperties")
            .map(|block| property_pairs(&block))
            .unwrap_or_default())
    }

    async fn update_object(
        &self,
        session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<()> {
        let mut props = vec![("%TARGET_LIBRARY".to_string(), self.config.library.clone())];
        props.extend_from_slice(properties);
        let inner = format!(
            "<call><dstIn>{dst}</dstIn><objectType>{object_type}</objectType>{props}</call>",
            dst = xml_escape(session.as_str()),
            object_type = xml_escape(object_type),
            props = property_set(&props),
        );
        let reply = self.call("UpdateObject", &inner).await?;
        Self::check_result("UpdateObject", &reply, &[0])
    }

    async fn delete_object(
        &self,
        session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<()> {
        let mut props = vec![("%TARGET_LIBRARY".to_string(), self.config.library.clone())];
        props.extend_from_slice(properties);
        let inner = format!(
            "<call><dstIn>{dst}</dstIn><objectType>{object_type}</objectType>{props}</call>",
            dst = xml_escape(session.as_str()),
            object_type = xml_escape(object_type),
            props = property_set(&props),
        );
        let reply = self.call("DeleteObject", &inner).await?;
        Self::check_result("DeleteObject", &reply, &[0])
    }

    async fn set_trustees(
        &self,
        session: &SessionToken,
        object_id: &str,
        trustees: &[TrusteeEntry],
    ) -> DmsResult<()> {
        let props = vec![
            ("%TARGET_LIBRARY".to_string(), self.config.library.clone()),
            ("%OBJECT_IDENTIFIER".to_string(), object_id.to_string()),
            ("%RECENTLY_USED_LOCATION".to_string(), self.config.recent_location()),
            ("SECURITY".to_string(), "1".to_string()),
        ];
        let names: Vec<&str> = trustees.iter().map(|t| t.name.as_str()).collect();
        let flags: Vec<i32> = trustees.iter().map(|t| t.kind.flag()).collect();
        let rights: Vec<i32> = trustees.iter().map(|t| t.rights).collect();
        let inner = format!(
            r#"<call><dstIn>{dst}</dstIn><objectType>DEF_PROF</objectType>{props}<trustees><trusteeCount>{count}</trusteeCount><trusteeFlags xmlns:a="{NS_ARRAYS}">{flags}</trusteeFlags><trusteeNames xmlns:a="{NS_ARRAYS}">{names}</trusteeNames><trusteeRights xmlns:a="{NS_ARRAYS}">{rights}</trusteeRights></trustees></call>"#,
            dst = xml_escape(session.as_str()),
            props = property_set(&props),
            count = trustees.len(),
            flags = int_array(&flags),
            names = string_array(&names),
            rights = int_array(&rights),
        );
        let reply = self.call("SetTrustees", &inner).await?;
        Self::check_result("SetTrustees", &reply, &[0])
    }

    async fn get_trustees(
        &self,
        session: &SessionToken,
        object_id: &str,
    ) -> DmsResult<Vec<TrusteeEntry>> {
        let props = vec![
            ("%TARGET_LIBRARY".to_string(), self.config.library.clone()),
            ("%OBJECT_IDENTIFIER".to_string(), object_id.to_string()),
        ];
        let inner = format!(
            "<call><dstIn>{dst}</dstIn><objectType>DEF_PROF</objectType>{props}</call>",
            dst = xml_escape(session.as_str()),
            props = property_set(&props),
        );
        let reply = self.call("GetTrustees", &inner).await?;
        Self::check_result("GetTrustees", &reply, &[0])?;

        let block = match xml_block(&reply, "trustees") {
            Some(b) => b,
            None => return Ok(Vec::new()),
        };
        let names = xml_block(&block, "trusteeNames")
            .map(|b| xml_text_all(&b, "string"))
            .unwrap_or_default();
        let flags = xml_block(&block, "trusteeFlags")
            .map(|b| xml_text_all(&b, "int"))
            .unwrap_or_default();
        let rights = xml_block(&block, "trusteeRights")
            .map(|b| xml_text_all(&b, "int"))
            .unwrap_or_default();

        let count = names.len().min(flags.len()).min(rights.len());
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(TrusteeEntry {
                name: xml_unescape(&names[i]),
                kind: TrusteeKind::from_flag(flags[i].trim().parse().unwrap_or(2)),
                rights: rights[i].trim().parse().unwrap_or(0),
                inferred: false,
            });
        }
        Ok(out)
    }

    async fn where_used(
        &self,
        session: &SessionToken,
        object_id: &str,
    ) -> DmsResult<Vec<LinkRecord>> {
        let ret = self
            .create_object(
                session,
                "ContentsCollection",
                &[
                    ("DOCNUMBER".to_string(), object_id.to_string()),
                    ("%CONTENTS_DIRECTIVE".to_string(), "%CONTENTS_WHERE_USED".to_string()),
                ],
            )
            .await?;
        let collection_id = match ret.first() {
            Some((_, id)) if !id.is_empty() => id.clone(),
            _ => return Ok(Vec::new()),
        };

        let links = self.enumerate_links(session, &collection_id).await;

        if let Err(e) = self.release_object(&collection_id).await {
            warn!("release of where-used collection {collection_id} failed: {e}");
        }
        links
    }

    async fn lookup_single(
        &self,
        session: &SessionToken,
        view: &str,
        criteria_field: &str,
        return_field: &str,
        value: &str,
    ) -> DmsResult<Option<String>> {
        let request = SearchRequest {
            object_type: view.to_string(),
            criteria: vec![(criteria_field.to_string(), value.to_string())],
            return_properties: vec![return_field.to_string()],
            sort_by: None,
            max_rows: 1,
        };
        let result_set = match self.search(session, &request).await? {
            Some(rs) => rs,
            None => return Ok(None),
        };
        let fetched = self.fetch_rows(&result_set, 1, 0).await;
        self.release_result_set(&result_set).await;

        match fetched? {
            RawResult::Rows(rows) => Ok(rows
                .first()
                .and_then(|r| r.first())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())),
            RawResult::Buffer(_) => {
                debug!("lookup on {view} answered with a result buffer; treating as no hit");
                Ok(None)
            }
            RawResult::Empty => Ok(None),
        }
    }

    async fn current_version(&self, session: &SessionToken, doc_id: &str) -> DmsResult<String> {
        // Preferred: the versions view, newest first.
        let request = SearchRequest {
            object_type: "VersionsSearch".to_string(),
            criteria: vec![("%OBJECT_IDENTIFIER".to_string(), doc_id.to_string())],
            return_properties: vec!["VERSION_ID".to_string()],
            sort_by: Some(("VERSION".to_string(), false)),
            max_rows: 0,
        };
        if let Ok(Some(result_set)) = self.search(session, &request).await {
            let fetched = self.fetch_rows(&result_set, 1, 0).await;
            self.release_result_set(&result_set).await;
            if let Ok(RawResult::Rows(rows)) = fetched {
                if let Some(v) = rows
                    .first()
                    .and_then(|r| r.first())
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty() && *v != "0")
                {
                    return Ok(v.to_string());
                }
            }
        }

        // Fallback: the document profile carries its version id.
        let criteria = vec![
            ("%TARGET_LIBRARY".to_string(), self.config.library.clone()),
            ("%DOCUMENT_NUMBER".to_string(), doc_id.to_string()),
        ];
        let inner = format!(
            "<call>{criteria}<dstIn>{dst}</dstIn></call>",
            criteria = criteria_set(&criteria),
            dst = xml_escape(session.as_str()),
        );
        if let Ok(reply) = self.call("GetDocSvr3", &inner).await {
            if result_code(&reply) == 0 {
                if let Some(block) = xml_block(&reply, "docProperties") {
                    let pairs = property_pairs(&block);
                    for key in ["%VERSION_ID", "VERSION_ID"] {
                        if let Some(v) = pair_value(&pairs, key).filter(|v| !v.is_empty() && *v != "0")
                        {
                            return Ok(v.to_string());
                        }
                    }
                }
            }
        }
        Ok("0".to_string())
    }
}

impl SoapGateway {
    /// Drain one where-used collection through the enumeration RPCs,
    /// releasing the enumerator on every path.
    async fn enumerate_links(
        &self,
        session: &SessionToken,
        collection_id: &str,
    ) -> DmsResult<Vec<LinkRecord>> {
        let inner = format!(
            "<call><collectionID>{col}</collectionID><dstIn>{dst}</dstIn></call>",
            col = xml_escape(collection_id),
            dst = xml_escape(session.as_str()),
        );
        let reply = self.call("NewEnum", &inner).await?;
        Self::check_result("NewEnum", &reply, &[0])?;
        let enum_id = match xml_text(&reply, "enumID").filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let inner = format!(
            "<call><dstIn>{dst}</dstIn><elementCount>{WHERE_USED_BATCH}</elementCount><enumID>{id}</enumID></call>",
            dst = xml_escape(session.as_str()),
            id = xml_escape(&enum_id),
        );
        let result = match self.call("NextData", &inner).await {
            Ok(reply) => Self::check_result("NextData", &reply, &[0, 1]).map(|_| parse_links(&reply)),
            Err(e) => Err(e),
        };

        if let Err(e) = self.release_object(&enum_id).await {
            warn!("release of where-used enumerator {enum_id} failed: {e}");
        }
        result
    }
}

/// Extract link records from a `NextData` reply's generic item rows.
fn parse_links(reply: &str) -> Vec<LinkRecord> {
    let Some(data) = xml_block(reply, "genericItemsData") else {
        return Vec::new();
    };
    let names = xml_block(&data, "propertyNames")
        .map(|b| xml_text_all(&b, "string"))
        .unwrap_or_default();
    let idx_of = |name: &str| names.iter().position(|n| n == name);
    let Some(idx_link) = idx_of("SYSTEM_ID") else {
        return Vec::new();
    };
    let idx_parent = idx_of("PARENT");
    let idx_version = idx_of("PARENT_VERSION");

    let rows_block = xml_block(&data, "propertyRows").unwrap_or_default();
    crate::xml::xml_blocks(&rows_block, "ArrayOfanyType")
        .iter()
        .filter_map(|row| {
            let values: Vec<String> = xml_text_all(row, "anyType")
                .iter()
                .map(|v| xml_unescape(v))
                .collect();
            let link_id = values.get(idx_link)?.trim().to_string();
            if link_id.is_empty() {
                return None;
            }
            let cell = |idx: Option<usize>| {
                idx.and_then(|i| values.get(i))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            };
            Some(LinkRecord {
                link_id,
                parent_id: cell(idx_parent),
                parent_version: cell(idx_version),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_set_counts_and_escapes() {
        let props = vec![
            ("DOCNAME".to_string(), "A & B".to_string()),
            ("TYPE_ID".to_string(), "FOLDER".to_string()),
        ];
        let xml = property_set(&props);
        assert!(xml.contains("<propertyCount>2</propertyCount>"));
        assert!(xml.contains("A &amp; B"));
    }

    #[test]
    fn property_pairs_zip_in_order() {
        let reply = r#"<retProperties><propertyNames><a:string>%OBJECT_IDENTIFIER</a:string><a:string>%VERSION_ID</a:string></propertyNames><propertyValues><a:anyType>17712345</a:anyType><a:anyType>9001</a:anyType></propertyValues></retProperties>"#;
        let pairs = property_pairs(reply);
        assert_eq!(pair_value(&pairs, "%OBJECT_IDENTIFIER"), Some("17712345"));
        assert_eq!(pair_value(&pairs, "%VERSION_ID"), Some("9001"));
    }

    #[test]
    fn fault_extraction_prefers_faultstring() {
        let body = "<s:Fault><faultstring>Unknown Trustee</faultstring></s:Fault>";
        assert_eq!(extract_fault(body), Some("Unknown Trustee".to_string()));
    }

    #[test]
    fn missing_result_code_reads_as_success() {
        assert_eq!(result_code("<reply/>"), 0);
    }

    #[test]
    fn parse_links_maps_columns_by_name() {
        let reply = r#"<NextDataResponse><resultCode>0</resultCode><genericItemsData>
            <propertyNames><a:string>PARENT</a:string><a:string>SYSTEM_ID</a:string><a:string>PARENT_VERSION</a:string></propertyNames>
            <propertyRows>
              <a:ArrayOfanyType><a:anyType>800</a:anyType><a:anyType>555</a:anyType><a:anyType>0</a:anyType></a:ArrayOfanyType>
              <a:ArrayOfanyType><a:anyType>801</a:anyType><a:anyType>556</a:anyType><a:anyType>3</a:anyType></a:ArrayOfanyType>
            </propertyRows></genericItemsData></NextDataResponse>"#;
        let links = parse_links(reply);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].link_id, "555");
        assert_eq!(links[0].parent_id.as_deref(), Some("800"));
        assert_eq!(links[0].parent_version.as_deref(), Some("0"));
        assert_eq!(links[1].parent_version.as_deref(), Some("3"));
    }
}
