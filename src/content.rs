//! Chunked document content transfer over server-side handles.
//!
//! The server hands out two nested handles per transfer: a content handle,
//! then a stream cursor over it. Streams must be released before their
//! content handle, and every acquired handle is released on every exit
//! path. Release failures are logged and never escalated.

use log::{debug, warn};

use crate::error::DmsResult;
use crate::gateway::DmsGateway;
use crate::types::{ContentHandle, DocumentProfile, SessionToken, StreamMode};

/// Upload chunk size. Smaller than the read size; write replies carry the
/// whole chunk back in the acknowledgement on some deployments.
const WRITE_CHUNK_BYTES: usize = 48 * 1024;

/// A downloaded document with its resolved delivery name.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// Streamed download/upload against one gateway.
pub struct ContentTransfer<'a, G: DmsGateway> {
    gateway: &'a G,
}

impl<'a, G: DmsGateway> ContentTransfer<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    /// Download the indexed version of a document.
    ///
    /// The delivery name is the document number with the extension of the
    /// server-side file name appended; without one the name falls back to
    /// the bare document number.
    pub async fn download(&self, session: &SessionToken, doc_id: &str) -> DmsResult<Document> {
        let content = self.gateway.open_content(session, doc_id).await?;
        let read = self.read_all(session, &content).await;
        self.release(&content.id, "content").await;

        let bytes = read?;
        let file_name = match extension_of(content.file_name.as_deref()) {
            Some(ext) => format!("{doc_id}.{ext}"),
            None => doc_id.to_string(),
        };
        debug!("downloaded {doc_id}: {} bytes as {file_name}", bytes.len());
        Ok(Document { bytes, file_name })
    }

    /// Create a new document profile and upload its first version.
    ///
    /// Returns the new document number.
    pub async fn upload(
        &self,
        session: &SessionToken,
        profile: &DocumentProfile,
        data: &[u8],
    ) -> DmsResult<String> {
        let mut props = vec![
            ("DOCNAME".to_string(), profile.name.clone()),
            ("ABSTRACT".to_string(), profile.abstract_text.clone()),
            ("APP_ID".to_string(), profile.app_id.clone()),
            ("%STATUS".to_string(), "%UNLOCK".to_string()),
        ];
        if let Some(author) = &profile.author {
            props.push(("AUTHOR_ID".to_string(), author.clone()));
            props.push(("TYPIST_ID".to_string(), author.clone()));
        }
        let ret = self
            .gateway
            .create_object(session, "DEF_PROF", &props)
            .await?;
        let doc_id = pair(&ret, "%OBJECT_IDENTIFIER")
            .ok_or_else(|| {
                crate::error::DmsError::parse("profile creation returned no document number")
            })?
            .to_string();
        let version_id = pair(&ret, "%VERSION_ID").unwrap_or("1").to_string();

        let content = self
            .gateway
            .open_write_content(session, &doc_id, &version_id)
            .await?;
        let written = self.write_all(session, &content, data).await;
        self.release(&content.id, "content").await;
        written?;

        // The freshly created profile stays checked out until unlocked.
        // Best-effort: the content is already committed at this point.
        let unlock = vec![
            ("%OBJECT_IDENTIFIER".to_string(), doc_id.clone()),
            ("%STATUS".to_string(), "%UNLOCK".to_string()),
        ];
        if let Err(e) = self.gateway.update_object(session, "DEF_PROF", &unlock).await {
            warn!("unlock of new document {doc_id} failed: {e}");
        }

        debug!("uploaded {} bytes as document {doc_id}", data.len());
        Ok(doc_id)
    }

    async fn read_all(
        &self,
        session: &SessionToken,
        content: &ContentHandle,
    ) -> DmsResult<Vec<u8>> {
        let stream = self
            .gateway
            .open_stream(session, content, StreamMode::Read)
            .await?;

        let mut bytes = Vec::new();
        let result = loop {
            match self.gateway.read_chunk(&stream).await {
                Ok(Some(chunk)) => bytes.extend_from_slice(&chunk),
                Ok(None) => break Ok(bytes),
                Err(e) => break Err(e),
            }
        };

        self.release(&stream.id, "stream").await;
        result
    }

    async fn write_all(
        &self,
        session: &SessionToken,
        content: &ContentHandle,
        data: &[u8],
    ) -> DmsResult<()> {
        let stream = self
            .gateway
            .open_stream(session, content, StreamMode::Write)
            .await?;

        let mut result = Ok(());
        for chunk in data.chunks(WRITE_CHUNK_BYTES) {
            if let Err(e) = self.gateway.write_chunk(&stream, chunk).await {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            result = self.gateway.commit_stream(&stream).await;
        }

        self.release(&stream.id, "stream").await;
        result
    }

    async fn release(&self, object_id: &str, what: &str) {
        if let Err(e) = self.gateway.release_object(object_id).await {
            warn!("release of {what} handle {object_id} failed: {e}");
        }
    }
}

fn pair<'p>(pairs: &'p [(String, String)], name: &str) -> Option<&'p str> {
    pairs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn extension_of(file_name: Option<&str>) -> Option<&str> {
    let name = file_name?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains(['\\', '/']) {
        return None;
    }
    Some(ext)
}
