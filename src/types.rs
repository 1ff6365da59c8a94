//! Shared data structures for the DMSvr adapter.

use serde::{Deserialize, Serialize};

// ─── Session ─────────────────────────────────────────────────────────

/// Opaque credential returned by login (`DSTOut` on the wire).
///
/// Required on every subsequent call. Lifetime is server-defined; callers
/// re-login when the server starts rejecting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(dst: impl Into<String>) -> Self {
        Self(dst.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Credential source for login. Both kinds use the identical call shape.
#[derive(Debug, Clone)]
pub enum LoginKind {
    /// Use the system account from [`GatewayConfig`](crate::GatewayConfig).
    System,
    /// Caller-supplied end-user credentials.
    User { username: String, password: String },
}

// ─── Handles ─────────────────────────────────────────────────────────

/// Server-side reference to opened document content.
///
/// Exclusively owned by the caller until explicitly released. Every
/// successful acquire must be matched by exactly one release, on every
/// exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHandle {
    pub id: String,
    /// `%VERSION_FILE_NAME` property when the server supplied one.
    pub file_name: Option<String>,
}

/// Server-side cursor over a content handle for chunked reads/writes.
/// Same ownership contract as [`ContentHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Read,
    Write,
}

/// Server-side result set produced by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSetId(pub String);

// ─── Tree items ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Pdf,
    /// Generic document; the everything-else bucket.
    File,
    /// Transient: type not determinable from the wire data alone, resolved
    /// through the external media-type resolver before surfacing to
    /// media-filtered callers.
    Pending,
}

/// One item of the remote hierarchy, as surfaced by a traversal.
/// Transient — never persisted by this adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    /// `None` for folders.
    pub media_type: Option<MediaType>,
}

impl TreeItem {
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ItemKind::Folder,
            media_type: None,
        }
    }

    pub fn file(id: impl Into<String>, name: impl Into<String>, media: MediaType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ItemKind::File,
            media_type: Some(media),
        }
    }
}

// ─── Trustees ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrusteeKind {
    User,
    Group,
}

impl TrusteeKind {
    /// Wire flag value: 2 = user, 1 = group.
    pub fn flag(self) -> i32 {
        match self {
            TrusteeKind::User => 2,
            TrusteeKind::Group => 1,
        }
    }

    pub fn from_flag(flag: i32) -> Self {
        if flag == 1 {
            TrusteeKind::Group
        } else {
            TrusteeKind::User
        }
    }
}

/// One access-control entry on an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrusteeEntry {
    pub name: String,
    pub kind: TrusteeKind,
    /// Rights bitmask, server-defined. 1 = read.
    pub rights: i32,
    /// `true` when `kind` is a guess rather than caller-declared fact.
    /// Only inferred entries are eligible for auto-correction.
    pub inferred: bool,
}

impl TrusteeEntry {
    /// Entry whose type the caller declared explicitly.
    pub fn declared(name: impl Into<String>, kind: TrusteeKind, rights: i32) -> Self {
        Self {
            name: name.into(),
            kind,
            rights,
            inferred: false,
        }
    }

    /// Entry with no declared type; assumed to be a user until the server
    /// says otherwise.
    pub fn inferred(name: impl Into<String>, rights: i32) -> Self {
        Self {
            name: name.into(),
            kind: TrusteeKind::User,
            rights,
            inferred: true,
        }
    }
}

// ─── Links ───────────────────────────────────────────────────────────

/// A reference from a container to a leaf item, produced by a where-used
/// query and consumed by the cascading deleter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// `SYSTEM_ID` of the content-item row.
    pub link_id: String,
    pub parent_id: Option<String>,
    /// Missing or `"0"` values are re-resolved on demand before deletion.
    pub parent_version: Option<String>,
}

// ─── Raw search results ──────────────────────────────────────────────

/// Shape of one fetched page of search results.
///
/// The server answers either with structured row nodes or with an opaque
/// result buffer; the variant is matched exhaustively instead of duck-typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResult {
    /// Row-per-item property values, column order as requested.
    Rows(Vec<Vec<String>>),
    /// Binary/text hybrid buffer for [`buffer::decode`](crate::buffer::decode).
    Buffer(Vec<u8>),
    Empty,
}

/// One search request against a server view or collection.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Server object type, e.g. `ContentsCollection`, `v_groups`.
    pub object_type: String,
    pub criteria: Vec<(String, String)>,
    pub return_properties: Vec<String>,
    /// Property name and ascending flag.
    pub sort_by: Option<(String, bool)>,
    /// 0 = no limit.
    pub max_rows: u32,
}

/// Metadata for a document upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentProfile {
    pub name: String,
    #[serde(default)]
    pub abstract_text: String,
    /// Server application id, e.g. `ACROBAT`.
    pub app_id: String,
    /// Author/typist account; the gateway's system user when `None`.
    #[serde(default)]
    pub author: Option<String>,
}
