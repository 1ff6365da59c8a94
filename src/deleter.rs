//! Profile deletion, including forced cascades over folder subtrees.
//!
//! A plain delete removes one profile and reports conflicts instead of
//! resolving them. A forced delete walks the subtree with an explicit
//! work queue (children are purged before their parents), strips every
//! container link pointing at each object, then deletes the profile.
//! Both paths are idempotent: deleting something already gone is a no-op
//! success.

use std::collections::HashSet;

use log::{debug, warn};

use crate::buffer;
use crate::error::DmsResult;
use crate::gateway::DmsGateway;
use crate::types::{ItemKind, LinkRecord, RawResult, SearchRequest, SessionToken};
use crate::walker::WalkerLimits;

/// What a delete actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The object no longer exists; nothing was done.
    NotFound,
    /// A non-forced delete hit live container references.
    Conflict(String),
}

/// Cascading deleter over one gateway.
pub struct CascadingDeleter<'a, G: DmsGateway> {
    gateway: &'a G,
    limits: WalkerLimits,
}

impl<'a, G: DmsGateway> CascadingDeleter<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self {
            gateway,
            limits: WalkerLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: WalkerLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Delete `object_id`. Without `force`, container references surface
    /// as [`DeleteOutcome::Conflict`] and nothing is removed.
    pub async fn delete(
        &self,
        session: &SessionToken,
        object_id: &str,
        force: bool,
    ) -> DmsResult<DeleteOutcome> {
        if !force {
            return self.delete_profile(session, object_id).await;
        }

        // Folders in discovery order; reversed below so children go first.
        let (folders, leaves) = self.collect_subtree(session, object_id).await?;
        for (folder_id, folder_leaves) in folders.iter().rev().zip(leaves.iter().rev()) {
            for leaf in folder_leaves {
                self.purge(session, leaf).await;
                self.delete_child(session, leaf).await;
            }
            if folder_id != object_id {
                self.purge(session, folder_id).await;
                self.delete_child(session, folder_id).await;
            }
        }

        self.purge(session, object_id).await;
        self.delete_profile(session, object_id).await
    }

    async fn delete_profile(
        &self,
        session: &SessionToken,
        object_id: &str,
    ) -> DmsResult<DeleteOutcome> {
        let props = vec![("%OBJECT_IDENTIFIER".to_string(), object_id.to_string())];
        match self.gateway.delete_object(session, "DEF_PROF", &props).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.is_not_found() => {
                debug!("{object_id} already gone");
                Ok(DeleteOutcome::NotFound)
            }
            Err(e) if e.is_referential_conflict() => Ok(DeleteOutcome::Conflict(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Breadth-first subtree discovery, bounded like a folder walk.
    /// Returns folder ids in discovery order and the file leaves of each.
    async fn collect_subtree(
        &self,
        session: &SessionToken,
        root_id: &str,
    ) -> DmsResult<(Vec<String>, Vec<Vec<String>>)> {
        let mut folders = vec![root_id.to_string()];
        let mut leaves: Vec<Vec<String>> = vec![Vec::new()];
        let mut visited: HashSet<String> = HashSet::from([root_id.to_string()]);
        let mut next = 0usize;

        while next < folders.len() && next < self.limits.max_folders {
            let folder_id = folders[next].clone();
            let children = match self.list_children(session, &folder_id).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("cascade cannot list folder {folder_id}: {e}");
                    Vec::new()
                }
            };
            for (child_id, kind) in children {
                match kind {
                    ItemKind::Folder => {
                        if visited.insert(child_id.clone()) {
                            folders.push(child_id);
                            leaves.push(Vec::new());
                        }
                    }
                    ItemKind::File => leaves[next].push(child_id),
                }
            }
            next += 1;
        }
        if next < folders.len() {
            warn!(
                "cascade stopped at {} folders, {} unexpanded",
                next,
                folders.len() - next
            );
            folders.truncate(next);
            leaves.truncate(next);
        }
        Ok((folders, leaves))
    }

    async fn list_children(
        &self,
        session: &SessionToken,
        folder_id: &str,
    ) -> DmsResult<Vec<(String, ItemKind)>> {
        let request = SearchRequest {
            object_type: "ContentsSearch".to_string(),
            criteria: vec![("FI.PARENT".to_string(), folder_id.to_string())],
            return_properties: vec!["FI.DOCNUMBER".to_string(), "FI.NODE_TYPE".to_string()],
            sort_by: None,
            max_rows: 0,
        };
        let result_set = match self.gateway.search(session, &request).await? {
            Some(rs) => rs,
            None => return Ok(Vec::new()),
        };

        let mut children = Vec::new();
        let mut starting_row = 0u32;
        let paged = loop {
            match self
                .gateway
                .fetch_rows(&result_set, self.limits.page_size, starting_row)
                .await
            {
                Ok(RawResult::Rows(rows)) => {
                    let page_len = rows.len();
                    for row in &rows {
                        let id = row.first().map(|v| v.trim()).unwrap_or_default();
                        if id.is_empty() {
                            continue;
                        }
                        let kind = match row.get(1).map(|v| v.trim()) {
                            Some(t) if t.eq_ignore_ascii_case("F") => ItemKind::Folder,
                            _ => ItemKind::File,
                        };
                        children.push((id.to_string(), kind));
                    }
                    starting_row += self.limits.page_size;
                    if (page_len as u32) < self.limits.page_size
                        || starting_row >= self.limits.max_row_offset
                    {
                        break Ok(());
                    }
                }
                Ok(RawResult::Buffer(raw)) => {
                    children.extend(
                        buffer::decode(&raw)
                            .into_iter()
                            .map(|item| (item.id, item.kind)),
                    );
                    break Ok(());
                }
                Ok(RawResult::Empty) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.gateway.release_result_set(&result_set).await;
        paged?;
        Ok(children)
    }

    /// Strip one object of its lock and container links. Every step is
    /// best-effort; a partially purged object is picked up cleanly by a
    /// re-run.
    async fn purge(&self, session: &SessionToken, object_id: &str) {
        let unlock = vec![
            ("%OBJECT_IDENTIFIER".to_string(), object_id.to_string()),
            ("%STATUS".to_string(), "%UNLOCK".to_string()),
        ];
        if let Err(e) = self.gateway.update_object(session, "DEF_PROF", &unlock).await {
            debug!("unlock of {object_id}: {e}");
        }

        let links = match self.gateway.where_used(session, object_id).await {
            Ok(links) => links,
            Err(e) => {
                warn!("where-used lookup for {object_id} failed: {e}");
                Vec::new()
            }
        };
        for link in links {
            self.delete_link(session, object_id, &link).await;
        }
    }

    /// Delete a child profile during a cascade. Failures are logged; the
    /// cascade keeps going and a re-run picks up what remains.
    async fn delete_child(&self, session: &SessionToken, object_id: &str) {
        match self.delete_profile(session, object_id).await {
            Ok(DeleteOutcome::Deleted) => debug!("cascade deleted {object_id}"),
            Ok(DeleteOutcome::NotFound) => {}
            Ok(DeleteOutcome::Conflict(msg)) => {
                warn!("cascade left {object_id} in place: {msg}")
            }
            Err(e) => warn!("cascade delete of {object_id} failed: {e}"),
        }
    }

    async fn delete_link(&self, session: &SessionToken, object_id: &str, link: &LinkRecord) {
        let parent = link.parent_id.clone().unwrap_or_default();
        // Stored parent versions are frequently stale zeros; re-resolve
        // against the parent before deleting the link.
        let version = match link.parent_version.as_deref() {
            Some(v) if v != "0" && !v.is_empty() => v.to_string(),
            _ if !parent.is_empty() => self
                .gateway
                .current_version(session, &parent)
                .await
                .unwrap_or_else(|_| "0".to_string()),
            _ => "0".to_string(),
        };

        let mut props = vec![
            ("SYSTEM_ID".to_string(), link.link_id.clone()),
            ("PARENT_VERSION".to_string(), version),
        ];
        if !parent.is_empty() {
            props.push(("PARENT".to_string(), parent));
        }
        match self.gateway.delete_object(session, "ContentItem", &props).await {
            Ok(()) => debug!("deleted link {} of {object_id}", link.link_id),
            Err(e) if e.is_not_found() => {
                debug!("link {} of {object_id} already gone", link.link_id)
            }
            Err(e) => warn!("deleting link {} of {object_id} failed: {e}", link.link_id),
        }
    }
}
