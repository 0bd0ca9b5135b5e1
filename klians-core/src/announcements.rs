//! Announcements board
//!
//! List of announcements (newest first as received), with an inline error
//! string instead of propagated failures. Only teachers and admins publish;
//! only the author deletes.

use crate::api::{ApiClient, NewAnnouncement};
use crate::models::{Announcement, UserSummary};
use crate::realtime::{Emitter, RealtimeEvent, EVENT_NEW_ANNOUNCEMENT};
use crate::{ClientError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const LOAD_FAILED: &str = "Failed to load announcements";
pub const CREATE_FAILED: &str = "Failed to create announcement";
pub const DELETE_FAILED: &str = "Failed to delete announcement";
pub const FIELDS_REQUIRED: &str = "Please fill in all fields";

#[derive(Debug, Default)]
struct BoardState {
    announcements: Vec<Announcement>,
    loading: bool,
    error: Option<String>,
}

impl BoardState {
    fn prepend(&mut self, announcement: Announcement) -> bool {
        if self.announcements.iter().any(|a| a.id == announcement.id) {
            return false;
        }
        self.announcements.insert(0, announcement);
        true
    }
}

/// Announcements state and operations
pub struct AnnouncementBoard {
    api: Arc<dyn ApiClient>,
    emitter: Option<Arc<dyn Emitter>>,
    state: Arc<RwLock<BoardState>>,
}

impl AnnouncementBoard {
    /// `emitter` receives `new-announcement` after each successful create
    pub fn new(api: Arc<dyn ApiClient>, emitter: Option<Arc<dyn Emitter>>) -> Self {
        Self {
            api,
            emitter,
            state: Arc::new(RwLock::new(BoardState::default())),
        }
    }

    /// Reload the list; on failure the old list stays and the error is set
    pub async fn refresh(&self) -> Result<usize> {
        self.state.write().await.loading = true;
        let result = self.api.list_announcements().await;

        let mut state = self.state.write().await;
        state.loading = false;
        match result {
            Ok(announcements) => {
                state.announcements = announcements;
                state.error = None;
                info!("Loaded {} announcements", state.announcements.len());
                Ok(state.announcements.len())
            }
            Err(e) => {
                warn!("Failed to load announcements: {}", e);
                state.error = Some(LOAD_FAILED.to_string());
                Err(e)
            }
        }
    }

    /// Publish an announcement as `author`
    ///
    /// Rejected without any network call when the author is a student or a
    /// field is blank.
    pub async fn create(
        &self,
        author: &UserSummary,
        announcement: NewAnnouncement,
    ) -> Result<Announcement> {
        if !author.role.can_broadcast() {
            return Err(ClientError::PermissionDenied(
                "Only teachers and admins can post announcements".to_string(),
            ));
        }
        if announcement.title.trim().is_empty() || announcement.content.trim().is_empty() {
            return Err(ClientError::validation(FIELDS_REQUIRED));
        }

        let created = match self.api.create_announcement(&announcement).await {
            Ok(created) => created,
            Err(e) => {
                warn!("Failed to create announcement: {}", e);
                self.state.write().await.error = Some(CREATE_FAILED.to_string());
                return Err(e);
            }
        };

        if let Some(emitter) = &self.emitter {
            let emitted = serde_json::to_value(&created)
                .map_err(ClientError::from)
                .and_then(|payload| emitter.emit(EVENT_NEW_ANNOUNCEMENT, payload));
            if let Err(e) = emitted {
                warn!("Could not emit {}: {}", EVENT_NEW_ANNOUNCEMENT, e);
            }
        }

        self.state.write().await.prepend(created.clone());
        info!("Created announcement {}", created.id);
        Ok(created)
    }

    /// Mark as read remotely, then locally
    pub async fn mark_read(&self, announcement_id: &str) -> Result<()> {
        self.api
            .mark_announcement_read(announcement_id)
            .await
            .map_err(|e| {
                warn!("Failed to mark announcement {} read: {}", announcement_id, e);
                e
            })?;

        let mut state = self.state.write().await;
        if let Some(a) = state
            .announcements
            .iter_mut()
            .find(|a| a.id == announcement_id)
        {
            a.is_read = true;
        }
        Ok(())
    }

    /// Delete an announcement the viewer wrote
    pub async fn delete(&self, viewer: &UserSummary, announcement_id: &str) -> Result<()> {
        let author_id = self
            .state
            .read()
            .await
            .announcements
            .iter()
            .find(|a| a.id == announcement_id)
            .map(|a| a.author.id.clone())
            .ok_or_else(|| ClientError::NotFound(format!("Announcement {}", announcement_id)))?;

        if author_id != viewer.id || !viewer.role.can_broadcast() {
            return Err(ClientError::PermissionDenied(
                "Only the author can delete this announcement".to_string(),
            ));
        }

        if let Err(e) = self.api.delete_announcement(announcement_id).await {
            warn!("Failed to delete announcement {}: {}", announcement_id, e);
            self.state.write().await.error = Some(DELETE_FAILED.to_string());
            return Err(e);
        }

        self.state
            .write()
            .await
            .announcements
            .retain(|a| a.id != announcement_id);
        info!("Deleted announcement {}", announcement_id);
        Ok(())
    }

    /// Apply a realtime event; returns whether the list changed
    pub async fn apply_realtime(&self, event: &RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::AnnouncementCreated(announcement) => {
                let added = self.state.write().await.prepend(announcement.clone());
                if !added {
                    debug!("Announcement {} already listed", announcement.id);
                }
                added
            }
            _ => false,
        }
    }

    pub async fn announcements(&self) -> Vec<Announcement> {
        self.state.read().await.announcements.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    pub async fn unread_count(&self) -> usize {
        self.state
            .read()
            .await
            .announcements
            .iter()
            .filter(|a| !a.is_read)
            .count()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.announcements.clear();
        state.error = None;
    }
}
