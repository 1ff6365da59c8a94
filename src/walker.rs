//! Bounded breadth-first traversal of the folder tree.
//!
//! Folder graphs on real libraries contain shared subfolders and the
//! occasional cycle, so traversal keeps a visited set and hard bounds on
//! pages per folder and folders per walk. A folder that fails to list is
//! logged and skipped; one broken branch never aborts the walk.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use log::{debug, warn};

use crate::buffer;
use crate::error::DmsResult;
use crate::gateway::DmsGateway;
use crate::types::{ItemKind, MediaType, RawResult, SearchRequest, SessionToken, TreeItem};

/// Column order of folder content listings.
const LISTING_PROPERTIES: [&str; 7] = [
    "FI.DOCNUMBER",
    "%DISPLAY_NAME",
    "FI.NODE_TYPE",
    "DOCNAME",
    "APPLICATION",
    "APP_ID",
    "DOSEXTENSION",
];

const FOLDER_APPS: [&str; 3] = ["FOLDER", "DEF_PROF", "SAVED_SEARCHES"];

/// Hard bounds for one walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkerLimits {
    /// Rows fetched per page.
    pub page_size: u32,
    /// Highest starting row requested within one folder.
    pub max_row_offset: u32,
    /// Folders expanded before the walk stops.
    pub max_folders: usize,
}

impl Default for WalkerLimits {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_row_offset: 2000,
            max_folders: 100,
        }
    }
}

/// Media bucket a caller can restrict a walk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFilter {
    Image,
    Video,
    Pdf,
    /// Everything that is neither an image nor a video.
    Files,
}

impl MediaFilter {
    fn matches(self, media: MediaType) -> bool {
        match self {
            MediaFilter::Image => media == MediaType::Image,
            MediaFilter::Video => media == MediaType::Video,
            MediaFilter::Pdf => media == MediaType::Pdf,
            MediaFilter::Files => media != MediaType::Image && media != MediaType::Video,
        }
    }
}

/// Optional match conditions for a walk. An empty filter matches every
/// file and no folder.
#[derive(Debug, Clone, Default)]
pub struct TraverseFilter {
    pub media: Option<MediaFilter>,
    pub name_substring: Option<String>,
}

/// Aggregate file counts for one subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaCounts {
    pub images: u64,
    pub videos: u64,
    pub files: u64,
}

/// Resolves pending media types out of band, in one batch per walk.
#[async_trait]
pub trait MediaTypeResolver: Send + Sync {
    async fn resolve(&self, ids: &[String]) -> DmsResult<HashMap<String, MediaType>>;
}

/// Breadth-first folder walker over one gateway.
pub struct FolderWalker<'a, G: DmsGateway> {
    gateway: &'a G,
    resolver: Option<&'a dyn MediaTypeResolver>,
    limits: WalkerLimits,
}

impl<'a, G: DmsGateway> FolderWalker<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self {
            gateway,
            resolver: None,
            limits: WalkerLimits::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn MediaTypeResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_limits(mut self, limits: WalkerLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Walk the subtree under `root_id` and return matching items:
    /// folders whose names match the name filter (when one is set),
    /// followed by files passing both filters. Each folder is expanded at
    /// most once regardless of how many parents link to it.
    pub async fn traverse(
        &self,
        session: &SessionToken,
        root_id: &str,
        filter: &TraverseFilter,
    ) -> DmsResult<Vec<TreeItem>> {
        let mut queue: VecDeque<String> = VecDeque::from([root_id.to_string()]);
        let mut visited: HashSet<String> = HashSet::from([root_id.to_string()]);
        let mut folders: Vec<TreeItem> = Vec::new();
        let mut files: Vec<TreeItem> = Vec::new();
        let mut expanded = 0usize;

        while let Some(folder_id) = queue.pop_front() {
            if expanded >= self.limits.max_folders {
                warn!(
                    "folder walk stopped at {} folders with {} still queued",
                    expanded,
                    queue.len() + 1
                );
                break;
            }
            expanded += 1;

            let children = match self.list_folder(session, &folder_id).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("skipping unlistable folder {folder_id}: {e}");
                    continue;
                }
            };

            for child in children {
                match child.kind {
                    ItemKind::Folder => {
                        if visited.insert(child.id.clone()) {
                            queue.push_back(child.id.clone());
                        }
                        if let Some(needle) = &filter.name_substring {
                            if contains_ignore_case(&child.name, needle) {
                                folders.push(child);
                            }
                        }
                    }
                    ItemKind::File => files.push(child),
                }
            }
        }

        self.resolve_pending(&mut files).await;

        files.retain(|item| {
            let media = item.media_type.unwrap_or(MediaType::File);
            let media_ok = filter.media.map_or(true, |f| f.matches(media));
            let name_ok = filter
                .name_substring
                .as_deref()
                .map_or(true, |needle| contains_ignore_case(&item.name, needle));
            media_ok && name_ok
        });

        debug!(
            "walk of {root_id}: {} folders expanded, {} folder / {} file matches",
            expanded,
            folders.len(),
            files.len()
        );
        folders.extend(files);
        Ok(folders)
    }

    /// Count files under `root_id` by media bucket.
    pub async fn count_by_media_type(
        &self,
        session: &SessionToken,
        root_id: &str,
    ) -> DmsResult<MediaCounts> {
        let items = self
            .traverse(session, root_id, &TraverseFilter::default())
            .await?;
        let mut counts = MediaCounts::default();
        for item in items.iter().filter(|i| i.kind == ItemKind::File) {
            match item.media_type.unwrap_or(MediaType::File) {
                MediaType::Image => counts.images += 1,
                MediaType::Video => counts.videos += 1,
                MediaType::Pdf | MediaType::File | MediaType::Pending => counts.files += 1,
            }
        }
        Ok(counts)
    }

    /// List the direct children of one folder, paging until the server
    /// runs dry or the row-offset bound is hit.
    async fn list_folder(
        &self,
        session: &SessionToken,
        folder_id: &str,
    ) -> DmsResult<Vec<TreeItem>> {
        let request = SearchRequest {
            object_type: "ContentsSearch".to_string(),
            criteria: vec![("FI.PARENT".to_string(), folder_id.to_string())],
            return_properties: LISTING_PROPERTIES.iter().map(|s| s.to_string()).collect(),
            sort_by: Some(("%DISPLAY_NAME".to_string(), true)),
            max_rows: 0,
        };
        let result_set = match self.gateway.search(session, &request).await? {
            Some(rs) => rs,
            None => return Ok(Vec::new()),
        };

        let mut items = Vec::new();
        let mut starting_row = 0u32;
        let paged = loop {
            match self
                .gateway
                .fetch_rows(&result_set, self.limits.page_size, starting_row)
                .await
            {
                Ok(RawResult::Rows(rows)) => {
                    let page_len = rows.len();
                    items.extend(rows.iter().filter_map(|row| parse_listing_row(row)));
                    starting_row += self.limits.page_size;
                    if (page_len as u32) < self.limits.page_size
                        || starting_row >= self.limits.max_row_offset
                    {
                        break Ok(());
                    }
                }
                Ok(RawResult::Buffer(raw)) => {
                    items.extend(buffer::decode(&raw));
                    break Ok(());
                }
                Ok(RawResult::Empty) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.gateway.release_result_set(&result_set).await;
        paged?;
        Ok(items)
    }

    async fn resolve_pending(&self, files: &mut [TreeItem]) {
        let pending: Vec<String> = files
            .iter()
            .filter(|i| i.media_type == Some(MediaType::Pending))
            .map(|i| i.id.clone())
            .collect();
        if pending.is_empty() {
            return;
        }

        let resolved = match self.resolver {
            Some(resolver) => match resolver.resolve(&pending).await {
                Ok(map) => map,
                Err(e) => {
                    warn!("media-type resolution of {} items failed: {e}", pending.len());
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        for item in files
            .iter_mut()
            .filter(|i| i.media_type == Some(MediaType::Pending))
        {
            let media = resolved.get(&item.id).copied().unwrap_or(MediaType::File);
            item.media_type = Some(media);
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Listing rows follow [`LISTING_PROPERTIES`] column order.
fn parse_listing_row(row: &[String]) -> Option<TreeItem> {
    let id = row.first().map(|v| v.trim()).filter(|v| !v.is_empty())?;
    let display = row.get(1).map(|v| v.trim()).unwrap_or_default();
    let node_type = row.get(2).map(|v| v.trim()).unwrap_or_default();
    let doc_name = row.get(3).map(|v| v.trim()).unwrap_or_default();
    let application = row.get(4).map(|v| v.trim()).unwrap_or_default();
    let app_id = row.get(5).map(|v| v.trim()).unwrap_or_default();
    let extension = row.get(6).map(|v| v.trim()).unwrap_or_default();

    // Display names arrive with a trailing one-letter status marker.
    let mut name = if display.is_empty() { doc_name } else { display };
    for marker in [" D", " N", " F"] {
        if let Some(stripped) = name.strip_suffix(marker) {
            name = stripped;
            break;
        }
    }
    if name.is_empty() {
        return None;
    }

    let is_folder = node_type.eq_ignore_ascii_case("F")
        || FOLDER_APPS.contains(&application)
        || FOLDER_APPS.contains(&app_id);
    if is_folder {
        return Some(TreeItem::folder(id, name));
    }

    let media = if extension.is_empty() {
        MediaType::Pending
    } else {
        buffer::media_for_extension(extension)
    };
    Some(TreeItem::file(id, name, media))
}
