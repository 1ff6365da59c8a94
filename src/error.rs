//! Error types for the DMSvr adapter.

use std::fmt;

/// Categorised error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmsErrorKind {
    /// Server unreachable or HTTP transport failure
    Connection,
    /// Remote call exceeded the configured timeout
    Timeout,
    /// Login rejected or session expired
    Authentication,
    /// No service binding declares the requested operation
    OperationUnavailable,
    /// SOAP fault or non-zero result code, with the server's code
    RemoteFault(i32),
    /// WSDL or response body could not be parsed
    Parse,
    /// The server rejected a trustee it could not identify
    UnknownTrustee,
    /// Delete blocked because the object is referenced elsewhere
    ReferentialConflict,
    /// Object does not exist on the server
    NotFound,
    /// Anything else
    Other,
}

/// Adapter error carrying a kind + human-readable message.
///
/// The server attaches its diagnostics as free text (`errorDoc`, fault
/// strings); that text is preserved verbatim in `message`.
#[derive(Debug, Clone)]
pub struct DmsError {
    pub kind: DmsErrorKind,
    pub message: String,
}

impl DmsError {
    pub fn new(kind: DmsErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::Connection, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::Timeout, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::Authentication, msg)
    }

    pub fn operation_unavailable(operation: &str) -> Self {
        Self::new(
            DmsErrorKind::OperationUnavailable,
            format!("no service binding declares operation '{operation}'"),
        )
    }

    pub fn remote(code: i32, msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::RemoteFault(code), msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::Parse, msg)
    }

    pub fn unknown_trustee(msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::UnknownTrustee, msg)
    }

    pub fn referential_conflict(msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::ReferentialConflict, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::NotFound, msg)
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::new(DmsErrorKind::Other, msg)
    }

    /// Whether this error is the server's unknown-trustee rejection.
    ///
    /// The service exposes no stable machine-readable code for this
    /// condition; the classifier falls back to a lowercase substring probe
    /// on the fault/error text. Known fragility, kept visible here rather
    /// than hidden behind the RPC layer.
    pub fn is_unknown_trustee(&self) -> bool {
        self.kind == DmsErrorKind::UnknownTrustee
            || self.message.to_lowercase().contains("unknown trustee")
    }

    /// Whether this error is the referenced-by-other-containers rejection.
    /// Same caveat as [`is_unknown_trustee`](Self::is_unknown_trustee):
    /// text matching, because nothing better exists on the wire.
    pub fn is_referential_conflict(&self) -> bool {
        self.kind == DmsErrorKind::ReferentialConflict || {
            let text = self.message.to_lowercase();
            text.contains("referenced") || text.contains("in use by")
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == DmsErrorKind::NotFound
    }
}

impl fmt::Display for DmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for DmsError {}

impl From<reqwest::Error> for DmsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DmsError::timeout(e.to_string())
        } else {
            DmsError::connection(e.to_string())
        }
    }
}

pub type DmsResult<T> = Result<T, DmsError>;

/// Classify a non-zero result code by its accompanying error text.
pub(crate) fn classify_remote(code: i32, text: &str) -> DmsError {
    let lower = text.to_lowercase();
    if lower.contains("unknown trustee") {
        DmsError::unknown_trustee(text)
    } else if lower.contains("referenced") || lower.contains("in use by") {
        DmsError::referential_conflict(text)
    } else if lower.contains("not found") || lower.contains("does not exist") {
        DmsError::not_found(text)
    } else {
        DmsError::remote(code, text)
    }
}
