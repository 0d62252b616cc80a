mod cleanup;
mod json;
mod memory;

use std::sync::Arc;

use crate::error::StoreError;
use crate::events::MediaItemHistory;
use crate::session::{LocalMediaProgress, PlaybackSession};
use crate::settings::DeviceSettings;

pub use cleanup::remove_orphaned_progress;
pub use json::JsonStore;
pub use memory::MemoryStore;

/// Key-value object store for progress records, cached sessions, per-item
/// history and device settings.
///
/// Writes are expected to be fast and durable; callers on the playback path
/// treat them as synchronous.
pub trait LocalStore: Send + Sync {
    fn local_media_progress(&self, id: &str) -> Result<Option<LocalMediaProgress>, StoreError>;

    fn all_local_media_progress(&self) -> Result<Vec<LocalMediaProgress>, StoreError>;

    fn save_local_media_progress(&self, progress: &LocalMediaProgress) -> Result<(), StoreError>;

    fn remove_local_media_progress(&self, id: &str) -> Result<(), StoreError>;

    /// Cache a session so it can be replayed if it never reaches the server
    fn save_playback_session(&self, session: &PlaybackSession) -> Result<(), StoreError>;

    fn remove_playback_session(&self, id: &str) -> Result<(), StoreError>;

    fn playback_sessions(&self) -> Result<Vec<PlaybackSession>, StoreError>;

    fn media_item_history(&self, id: &str) -> Result<Option<MediaItemHistory>, StoreError>;

    fn save_media_item_history(&self, history: &MediaItemHistory) -> Result<(), StoreError>;

    /// Device settings, falling back to defaults when none were saved
    fn device_settings(&self) -> Result<DeviceSettings, StoreError>;

    fn save_device_settings(&self, settings: &DeviceSettings) -> Result<(), StoreError>;
}

/// A shared reference to a local store
pub type SharedStore = Arc<dyn LocalStore>;
