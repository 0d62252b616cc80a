use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::events::MediaItemHistory;
use crate::session::{LocalMediaProgress, PlaybackSession};
use crate::settings::DeviceSettings;

use super::{LocalStore, SharedStore};

#[derive(Debug, Default)]
struct Records {
    progress: HashMap<String, LocalMediaProgress>,
    sessions: HashMap<String, PlaybackSession>,
    history: HashMap<String, MediaItemHistory>,
    settings: Option<DeviceSettings>,
}

/// Process-local store, used in tests and by hosts that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new MemoryStore wrapped in an Arc
    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalStore for MemoryStore {
    fn local_media_progress(&self, id: &str) -> Result<Option<LocalMediaProgress>, StoreError> {
        Ok(self.records().progress.get(id).cloned())
    }

    fn all_local_media_progress(&self) -> Result<Vec<LocalMediaProgress>, StoreError> {
        Ok(self.records().progress.values().cloned().collect())
    }

    fn save_local_media_progress(&self, progress: &LocalMediaProgress) -> Result<(), StoreError> {
        self.records()
            .progress
            .insert(progress.id.clone(), progress.clone());
        Ok(())
    }

    fn remove_local_media_progress(&self, id: &str) -> Result<(), StoreError> {
        self.records().progress.remove(id);
        Ok(())
    }

    fn save_playback_session(&self, session: &PlaybackSession) -> Result<(), StoreError> {
        self.records()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn remove_playback_session(&self, id: &str) -> Result<(), StoreError> {
        self.records().sessions.remove(id);
        Ok(())
    }

    fn playback_sessions(&self) -> Result<Vec<PlaybackSession>, StoreError> {
        Ok(self.records().sessions.values().cloned().collect())
    }

    fn media_item_history(&self, id: &str) -> Result<Option<MediaItemHistory>, StoreError> {
        Ok(self.records().history.get(id).cloned())
    }

    fn save_media_item_history(&self, history: &MediaItemHistory) -> Result<(), StoreError> {
        self.records()
            .history
            .insert(history.id.clone(), history.clone());
        Ok(())
    }

    fn device_settings(&self) -> Result<DeviceSettings, StoreError> {
        Ok(self.records().settings.clone().unwrap_or_default())
    }

    fn save_device_settings(&self, settings: &DeviceSettings) -> Result<(), StoreError> {
        self.records().settings = Some(settings.clone());
        Ok(())
    }
}
