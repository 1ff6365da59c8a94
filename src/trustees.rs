//! Trustee assignment with one bounded correction retry.
//!
//! Access lists frequently arrive with raw directory identifiers where
//! the server wants login names, and with user entries that are really
//! groups. The server rejects such lists wholesale. One correction pass
//! rewrites the list: identifier lookups through the directory views,
//! falling back to kind flips for inferred entries only when no lookup
//! hit. The assignment is retried exactly once; a second rejection is
//! definitive.

use log::{debug, warn};

use crate::error::DmsResult;
use crate::gateway::DmsGateway;
use crate::types::{SessionToken, TrusteeEntry, TrusteeKind};

const MAX_ATTEMPTS: u32 = 2;

/// Directory views probed for a numeric trustee name, in order. Group
/// views come first; a numeric id that resolves in both is a group.
const LOOKUP_VIEWS: [(&str, &str, &str, TrusteeKind); 5] = [
    ("v_groups", "SYSTEM_ID", "GROUP_ID", TrusteeKind::Group),
    ("v_peoples", "SYSTEM_ID", "USER_ID", TrusteeKind::User),
    ("v_usergroups", "SYSTEM_ID", "GROUP_ID", TrusteeKind::Group),
    ("v_nativegroups", "SYSTEM_ID", "GROUP_ID", TrusteeKind::Group),
    ("v_peoples", "PEOPLE_SYSTEM_ID", "USER_ID", TrusteeKind::User),
];

/// Applies trustee lists through one gateway.
pub struct TrusteeResolver<'a, G: DmsGateway> {
    gateway: &'a G,
}

impl<'a, G: DmsGateway> TrusteeResolver<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    /// Replace the trustee list of `object_id`, correcting and retrying
    /// once on an unknown-trustee rejection.
    pub async fn apply(
        &self,
        session: &SessionToken,
        object_id: &str,
        trustees: Vec<TrusteeEntry>,
    ) -> DmsResult<()> {
        let mut current = trustees;
        let mut attempt = 1;
        loop {
            match self.gateway.set_trustees(session, object_id, &current).await {
                Ok(()) => {
                    debug!("trustees applied to {object_id} on attempt {attempt}");
                    return Ok(());
                }
                Err(e) if e.is_unknown_trustee() && attempt < MAX_ATTEMPTS => {
                    let (corrected, changed) = self.correct(session, current).await;
                    if !changed {
                        // Nothing to rewrite; retrying verbatim cannot help.
                        return Err(e);
                    }
                    warn!("trustee list for {object_id} rejected, retrying corrected list: {e}");
                    current = corrected;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One correction pass, three steps in strict priority order. Each
    /// step runs only when the previous one changed nothing: first
    /// numeric names are resolved through the directory views, then
    /// numeric inferred users are flipped to groups, then any inferred
    /// user is. Once a step rewrites something the rest of the list is
    /// retried untouched.
    async fn correct(
        &self,
        session: &SessionToken,
        trustees: Vec<TrusteeEntry>,
    ) -> (Vec<TrusteeEntry>, bool) {
        let mut entries = trustees;

        let mut resolved = false;
        for entry in entries.iter_mut() {
            if !is_numeric(&entry.name) {
                continue;
            }
            if let Some((name, kind)) = self.lookup_identity(session, &entry.name).await {
                debug!("trustee id {} resolved to {name} ({kind:?})", entry.name);
                entry.name = name;
                entry.kind = kind;
                resolved = true;
            }
        }
        if resolved {
            return (entries, true);
        }

        let mut flipped = false;
        for entry in entries.iter_mut() {
            if is_numeric(&entry.name) && entry.inferred && entry.kind == TrusteeKind::User {
                entry.kind = TrusteeKind::Group;
                flipped = true;
            }
        }
        if flipped {
            return (entries, true);
        }

        for entry in entries.iter_mut() {
            if entry.inferred && entry.kind == TrusteeKind::User {
                entry.kind = TrusteeKind::Group;
                flipped = true;
            }
        }
        (entries, flipped)
    }

    async fn lookup_identity(
        &self,
        session: &SessionToken,
        id: &str,
    ) -> Option<(String, TrusteeKind)> {
        for (view, criteria_field, return_field, kind) in LOOKUP_VIEWS {
            match self
                .gateway
                .lookup_single(session, view, criteria_field, return_field, id)
                .await
            {
                Ok(Some(name)) if !name.is_empty() => return Some((name, kind)),
                Ok(_) => {}
                Err(e) => warn!("trustee lookup in {view} for {id} failed: {e}"),
            }
        }
        None
    }
}

fn is_numeric(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}
