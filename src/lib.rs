//! # dmsvr — client adapter for legacy DMSvr SOAP document management
//!
//! Talks to a remote DMSvr-style document-management server through its
//! SOAP-tunneled RPC surface. Provides:
//!
//! - **Gateway** — WSDL binding resolution, session login, one bounded
//!   send path for every RPC
//! - **Content transfer** — chunked download/upload over server-side
//!   content and stream handles, released on every exit path
//! - **Result-buffer decoding** — the reverse-engineered binary/text
//!   hybrid result format (zlib + UTF-16LE + token heuristics)
//! - **Folder traversal** — bounded breadth-first walk of the remote
//!   hierarchy with batched media-type resolution
//! - **Folder administration** — folder creation and renames through the
//!   generic object RPCs
//! - **Trustees** — access-control updates with fault-driven
//!   self-correction
//! - **Cascading delete** — reference discovery, unlinking and profile
//!   destruction over an explicit work queue

pub mod buffer;
pub mod config;
pub mod content;
pub mod deleter;
pub mod error;
pub mod folders;
pub mod gateway;
pub mod trustees;
pub mod types;
pub mod walker;
pub mod wsdl;
pub mod xml;

pub use config::GatewayConfig;
pub use content::{ContentTransfer, Document};
pub use deleter::{CascadingDeleter, DeleteOutcome};
pub use error::{DmsError, DmsErrorKind, DmsResult};
pub use folders::FolderOps;
pub use gateway::{DmsGateway, SoapGateway};
pub use trustees::TrusteeResolver;
pub use types::{
    ItemKind, LinkRecord, LoginKind, MediaType, SessionToken, TreeItem, TrusteeEntry, TrusteeKind,
};
pub use walker::{FolderWalker, MediaFilter, MediaTypeResolver, TraverseFilter, WalkerLimits};
