//! Folder administration: creation and renames.
//!
//! Folders are ordinary profiles linked into their parent through a
//! `ContentItem` row, so both operations compose the generic object RPCs.

use log::{debug, warn};

use crate::error::{DmsError, DmsResult};
use crate::gateway::DmsGateway;
use crate::types::SessionToken;

pub struct FolderOps<'a, G: DmsGateway> {
    gateway: &'a G,
}

impl<'a, G: DmsGateway> FolderOps<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    /// Create a folder under `parent_id` and return its object id.
    pub async fn create_folder(
        &self,
        session: &SessionToken,
        parent_id: &str,
        name: &str,
    ) -> DmsResult<String> {
        let props = vec![
            ("DOCNAME".to_string(), name.to_string()),
            ("APP_ID".to_string(), "FOLDER".to_string()),
            ("%STATUS".to_string(), "%UNLOCK".to_string()),
        ];
        let ret = self
            .gateway
            .create_object(session, "DEF_PROF", &props)
            .await?;
        let folder_id = ret
            .iter()
            .find(|(n, _)| n == "%OBJECT_IDENTIFIER")
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DmsError::parse("folder creation returned no object id"))?;

        // The link wants the parent's live version, not the stored zero.
        let parent_version = self.gateway.current_version(session, parent_id).await?;
        let link = vec![
            ("PARENT".to_string(), parent_id.to_string()),
            ("PARENT_VERSION".to_string(), parent_version),
            ("DOCNUMBER".to_string(), folder_id.clone()),
            ("DISPLAYNAME".to_string(), name.to_string()),
        ];
        self.gateway
            .create_object(session, "ContentItem", &link)
            .await?;

        debug!("created folder {folder_id} ('{name}') under {parent_id}");
        Ok(folder_id)
    }

    /// Rename an object: its profile name plus the display name on every
    /// container link referencing it.
    pub async fn rename(
        &self,
        session: &SessionToken,
        object_id: &str,
        new_name: &str,
    ) -> DmsResult<()> {
        let props = vec![
            ("%OBJECT_IDENTIFIER".to_string(), object_id.to_string()),
            ("DOCNAME".to_string(), new_name.to_string()),
        ];
        self.gateway
            .update_object(session, "DEF_PROF", &props)
            .await?;

        // Display names live on the links, one per containing folder.
        let links = self.gateway.where_used(session, object_id).await?;
        for link in links {
            let props = vec![
                ("SYSTEM_ID".to_string(), link.link_id.clone()),
                ("DISPLAYNAME".to_string(), new_name.to_string()),
            ];
            if let Err(e) = self
                .gateway
                .update_object(session, "ContentItem", &props)
                .await
            {
                warn!("display-name update on link {} failed: {e}", link.link_id);
            }
        }
        Ok(())
    }
}
