//! Scripted in-process gateway for driving the higher layers.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use dmsvr::types::{
    ContentHandle, RawResult, ResultSetId, SearchRequest, SessionToken, StreamHandle, StreamMode,
};
use dmsvr::{DmsError, DmsGateway, DmsResult, LinkRecord, LoginKind, TrusteeEntry};

/// One scripted answer to a stream read.
#[derive(Debug, Clone)]
pub enum ChunkStep {
    Data(Vec<u8>),
    Eof,
    Fail,
}

#[derive(Default)]
pub struct State {
    /// Folder id -> listing rows (walker/deleter column order).
    pub folders: HashMap<String, Vec<Vec<String>>>,
    /// Folder id -> raw binary buffer answered instead of rows.
    pub buffers: HashMap<String, Vec<u8>>,
    /// Content handle file names by document id.
    pub content_names: HashMap<String, String>,
    /// Scripted stream reads, consumed in order.
    pub chunks: Vec<ChunkStep>,
    /// (view, criteria field, value) -> resolved name.
    pub lookups: HashMap<(String, String, String), String>,
    /// Object id -> container links.
    pub links: HashMap<String, Vec<LinkRecord>>,
    /// Parent id -> current version.
    pub versions: HashMap<String, String>,
    /// Ids that answer not-found.
    pub missing: HashSet<String>,
    /// Ids whose plain delete hits live references.
    pub conflicting: HashSet<String>,
    /// Leading set_trustees calls that fail with an unknown trustee.
    pub trustee_rejections: u32,

    // Recordings.
    pub listed: Vec<String>,
    pub opened_sets: HashMap<String, (String, Vec<String>)>,
    pub released_sets: Vec<String>,
    pub acquired: Vec<String>,
    pub released: Vec<String>,
    pub written: Vec<Vec<u8>>,
    pub committed: Vec<String>,
    pub creates: Vec<(String, Vec<(String, String)>)>,
    pub updates: Vec<(String, Vec<(String, String)>)>,
    pub deletes: Vec<(String, Vec<(String, String)>)>,
    pub trustee_calls: Vec<Vec<TrusteeEntry>>,

    next_set: u32,
    chunk_pos: usize,
}

pub struct FakeGateway {
    pub state: Mutex<State>,
}

impl FakeGateway {
    pub fn new(state: State) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn session() -> SessionToken {
        SessionToken::new("DST-TEST")
    }

    fn prop<'p>(props: &'p [(String, String)], name: &str) -> Option<&'p str> {
        props
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
impl DmsGateway for FakeGateway {
    async fn login(&self, _kind: LoginKind) -> DmsResult<SessionToken> {
        Ok(Self::session())
    }

    async fn search(
        &self,
        _session: &SessionToken,
        request: &SearchRequest,
    ) -> DmsResult<Option<ResultSetId>> {
        let mut state = self.state.lock().unwrap();
        let key = request
            .criteria
            .first()
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        state.listed.push(key.clone());
        if !state.folders.contains_key(&key) && !state.buffers.contains_key(&key) {
            return Ok(None);
        }
        state.next_set += 1;
        let id = format!("rs-{}", state.next_set);
        state
            .opened_sets
            .insert(id.clone(), (key, request.return_properties.clone()));
        Ok(Some(ResultSetId(id)))
    }

    async fn fetch_rows(
        &self,
        result_set: &ResultSetId,
        _requested_rows: u32,
        starting_row: u32,
    ) -> DmsResult<RawResult> {
        let state = self.state.lock().unwrap();
        if starting_row > 0 {
            return Ok(RawResult::Empty);
        }
        let (key, requested) = state
            .opened_sets
            .get(&result_set.0)
            .cloned()
            .ok_or_else(|| DmsError::other(format!("unknown result set {}", result_set.0)))?;
        if let Some(raw) = state.buffers.get(&key) {
            return Ok(RawResult::Buffer(raw.clone()));
        }
        match state.folders.get(&key) {
            Some(rows) if !rows.is_empty() => Ok(RawResult::Rows(
                rows.iter().map(|row| project(row, &requested)).collect(),
            )),
            _ => Ok(RawResult::Empty),
        }
    }

    async fn release_result_set(&self, result_set: &ResultSetId) {
        self.state
            .lock()
            .unwrap()
            .released_sets
            .push(result_set.0.clone());
    }

    async fn open_content(&self, _session: &SessionToken, doc_id: &str) -> DmsResult<ContentHandle> {
        let mut state = self.state.lock().unwrap();
        if state.missing.contains(doc_id) {
            return Err(DmsError::not_found(format!("document {doc_id}")));
        }
        let id = format!("content-{doc_id}");
        state.acquired.push(id.clone());
        Ok(ContentHandle {
            id,
            file_name: state.content_names.get(doc_id).cloned(),
        })
    }

    async fn open_write_content(
        &self,
        _session: &SessionToken,
        doc_id: &str,
        _version_id: &str,
    ) -> DmsResult<ContentHandle> {
        let mut state = self.state.lock().unwrap();
        let id = format!("content-{doc_id}");
        state.acquired.push(id.clone());
        Ok(ContentHandle { id, file_name: None })
    }

    async fn open_stream(
        &self,
        _session: &SessionToken,
        content: &ContentHandle,
        _mode: StreamMode,
    ) -> DmsResult<StreamHandle> {
        let mut state = self.state.lock().unwrap();
        let id = format!("stream-{}", content.id);
        state.acquired.push(id.clone());
        Ok(StreamHandle { id })
    }

    async fn read_chunk(&self, _stream: &StreamHandle) -> DmsResult<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        let step = state.chunks.get(state.chunk_pos).cloned();
        state.chunk_pos += 1;
        match step {
            Some(ChunkStep::Data(bytes)) => Ok(Some(bytes)),
            Some(ChunkStep::Eof) | None => Ok(None),
            Some(ChunkStep::Fail) => Err(DmsError::connection("stream read interrupted")),
        }
    }

    async fn write_chunk(&self, _stream: &StreamHandle, data: &[u8]) -> DmsResult<()> {
        self.state.lock().unwrap().written.push(data.to_vec());
        Ok(())
    }

    async fn commit_stream(&self, stream: &StreamHandle) -> DmsResult<()> {
        self.state.lock().unwrap().committed.push(stream.id.clone());
        Ok(())
    }

    async fn release_object(&self, object_id: &str) -> DmsResult<()> {
        self.state.lock().unwrap().released.push(object_id.to_string());
        Ok(())
    }

    async fn create_object(
        &self,
        _session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<Vec<(String, String)>> {
        self.state
            .lock()
            .unwrap()
            .creates
            .push((object_type.to_string(), properties.to_vec()));
        match object_type {
            "DEF_PROF" => Ok(vec![
                ("%OBJECT_IDENTIFIER".to_string(), "900001".to_string()),
                ("%VERSION_ID".to_string(), "1".to_string()),
            ]),
            _ => Ok(vec![(
                "%OBJECT_IDENTIFIER".to_string(),
                "col-1".to_string(),
            )]),
        }
    }

    async fn update_object(
        &self,
        _session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<()> {
        self.state
            .lock()
            .unwrap()
            .updates
            .push((object_type.to_string(), properties.to_vec()));
        Ok(())
    }

    async fn delete_object(
        &self,
        _session: &SessionToken,
        object_type: &str,
        properties: &[(String, String)],
    ) -> DmsResult<()> {
        let mut state = self.state.lock().unwrap();
        let id = Self::prop(properties, "%OBJECT_IDENTIFIER")
            .or_else(|| Self::prop(properties, "SYSTEM_ID"))
            .unwrap_or_default()
            .to_string();
        if state.missing.contains(&id) {
            return Err(DmsError::not_found(format!("{object_type} {id}")));
        }
        if object_type == "DEF_PROF" && state.conflicting.contains(&id) {
            return Err(DmsError::referential_conflict(format!(
                "{id} is referenced by other containers"
            )));
        }
        state
            .deletes
            .push((object_type.to_string(), properties.to_vec()));
        if object_type == "DEF_PROF" {
            state.missing.insert(id.clone());
            state.folders.remove(&id);
            state.links.remove(&id);
        }
        Ok(())
    }

    async fn set_trustees(
        &self,
        _session: &SessionToken,
        _object_id: &str,
        trustees: &[TrusteeEntry],
    ) -> DmsResult<()> {
        let mut state = self.state.lock().unwrap();
        state.trustee_calls.push(trustees.to_vec());
        if state.trustee_rejections > 0 {
            state.trustee_rejections -= 1;
            return Err(DmsError::unknown_trustee("Unknown Trustee in list"));
        }
        Ok(())
    }

    async fn get_trustees(
        &self,
        _session: &SessionToken,
        _object_id: &str,
    ) -> DmsResult<Vec<TrusteeEntry>> {
        Ok(Vec::new())
    }

    async fn where_used(
        &self,
        _session: &SessionToken,
        object_id: &str,
    ) -> DmsResult<Vec<LinkRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .get(object_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup_single(
        &self,
        _session: &SessionToken,
        view: &str,
        criteria_field: &str,
        _return_field: &str,
        value: &str,
    ) -> DmsResult<Option<String>> {
        let key = (
            view.to_string(),
            criteria_field.to_string(),
            value.to_string(),
        );
        Ok(self.state.lock().unwrap().lookups.get(&key).cloned())
    }

    async fn current_version(&self, _session: &SessionToken, doc_id: &str) -> DmsResult<String> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .versions
            .get(doc_id)
            .cloned()
            .unwrap_or_else(|| "0".to_string()))
    }
}

/// Canonical column order rows are stored in; fetches project onto the
/// properties each search actually asked for.
const ROW_COLUMNS: [&str; 7] = [
    "FI.DOCNUMBER",
    "%DISPLAY_NAME",
    "FI.NODE_TYPE",
    "DOCNAME",
    "APPLICATION",
    "APP_ID",
    "DOSEXTENSION",
];

fn project(row: &[String], requested: &[String]) -> Vec<String> {
    requested
        .iter()
        .map(|prop| {
            ROW_COLUMNS
                .iter()
                .position(|c| c == prop)
                .and_then(|i| row.get(i).cloned())
                .unwrap_or_default()
        })
        .collect()
}

/// Listing row in canonical column order.
pub fn folder_row(id: &str, name: &str) -> Vec<String> {
    vec![
        id.to_string(),
        name.to_string(),
        "F".to_string(),
        name.to_string(),
        "FOLDER".to_string(),
        "FOLDER".to_string(),
        String::new(),
    ]
}

pub fn file_row(id: &str, name: &str, extension: &str) -> Vec<String> {
    vec![
        id.to_string(),
        name.to_string(),
        String::new(),
        name.to_string(),
        "APP".to_string(),
        "APP".to_string(),
        extension.to_string(),
    ]
}
