use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::PlaybackSession;

/// Whether an event came from the playback lifecycle or a progress reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaItemEventType {
    Playback,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemEvent {
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: MediaItemEventType,
    #[serde(default)]
    pub description: String,
    pub current_time: f64,
    pub server_sync_attempted: bool,
    #[serde(default)]
    pub server_sync_success: Option<bool>,
    #[serde(default)]
    pub server_sync_message: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Append-only event log for one media item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemHistory {
    /// Media item id the history belongs to
    pub id: String,
    pub media_display_title: String,
    #[serde(default)]
    pub library_item_id: Option<String>,
    #[serde(default)]
    pub episode_id: Option<String>,
    pub is_local: bool,
    #[serde(default)]
    pub server_connection_config_id: Option<String>,
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default)]
    pub server_user_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub events: Vec<MediaItemEvent>,
}

impl MediaItemHistory {
    /// Empty history for the item a session plays
    pub fn for_session(id: String, session: &PlaybackSession) -> Self {
        Self {
            id,
            media_display_title: session.display_title_or_unset().to_string(),
            library_item_id: session.library_item_id.clone(),
            episode_id: session.episode_id().map(String::from),
            is_local: session.is_local(),
            server_connection_config_id: session.server_connection_config_id.clone(),
            server_address: session.server_address.clone(),
            server_user_id: session.user_id.clone(),
            created_at: Utc::now(),
            events: Vec::new(),
        }
    }

    pub fn last_event(&self) -> Option<&MediaItemEvent> {
        self.events.last()
    }
}
