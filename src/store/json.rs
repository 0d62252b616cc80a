// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::events::MediaItemHistory;
use crate::session::{LocalMediaProgress, PlaybackSession};
use crate::settings::DeviceSettings;

use super::LocalStore;

const PROGRESS_DIR: &str = "progress";
const SESSIONS_DIR: &str = "sessions";
const HISTORY_DIR: &str = "history";
const SETTINGS_FILE: &str = "settings.json";
const PARTIAL_SUFFIX: &str = ".partial";

/// Store keeping one JSON file per record below a root directory
///
/// Layout:
/// - `progress/<id>.json` local media progress
/// - `sessions/<id>.json` sessions not yet confirmed by the server
/// - `history/<id>.json` per-item event history
/// - `settings.json` device settings
///
/// Records are written to a `.partial` file first and renamed into place, so
/// a crash mid-write never leaves a truncated record behind.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
    partial_files_cleaned: usize,
}

impl JsonStore {
    /// Open (and create if needed) a store rooted at `root`
    ///
    /// Leftover `.partial` files from interrupted writes are removed.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let mut partial_files_cleaned = 0;

        for dir in [PROGRESS_DIR, SESSIONS_DIR, HISTORY_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| StoreError::CreateDirectoryFailed {
                path: path.clone(),
                source: e,
            })?;
            partial_files_cleaned += remove_partial_files(&path)?;
        }
        partial_files_cleaned += remove_partial_files(root)?;

        if partial_files_cleaned > 0 {
            debug!(
                "Removed {} interrupted writes from {}",
                partial_files_cleaned,
                root.display()
            );
        }

        Ok(Self {
            root: root.to_path_buf(),
            partial_files_cleaned,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of interrupted writes cleaned up when the store was opened
    pub fn partial_files_cleaned(&self) -> usize {
        self.partial_files_cleaned
    }

    /// File of record `id` in `dir`
    ///
    /// Ids that are not valid file names as they are get rejected, so two
    /// ids never share a file.
    fn record_path(&self, dir: &str, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || sanitize_filename::sanitize(id) != id {
            return Err(StoreError::InvalidRecordId { id: id.to_string() });
        }
        Ok(self.root.join(dir).join(format!("{id}.json")))
    }
}

fn remove_partial_files(dir: &Path) -> Result<usize, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::ReadDirectoryFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut cleaned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));

        if is_partial && std::fs::remove_file(&path).is_ok() {
            cleaned += 1;
        }
    }
    Ok(cleaned)
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(record)?;

    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    std::fs::write(&partial, json).map_err(|e| StoreError::WriteFailed {
        path: partial.clone(),
        source: e,
    })?;
    std::fs::rename(&partial, path).map_err(|e| StoreError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StoreError::JsonParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Read every record in a directory, skipping files that fail to parse
fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::ReadDirectoryFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::ReadDirectoryFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        match read_record(&path) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable record: {}", e),
        }
    }
    Ok(records)
}

fn remove_record(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::RemoveFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

impl LocalStore for JsonStore {
    fn local_media_progress(&self, id: &str) -> Result<Option<LocalMediaProgress>, StoreError> {
        read_record(&self.record_path(PROGRESS_DIR, id)?)
    }

    fn all_local_media_progress(&self) -> Result<Vec<LocalMediaProgress>, StoreError> {
        read_all(&self.root.join(PROGRESS_DIR))
    }

    fn save_local_media_progress(&self, progress: &LocalMediaProgress) -> Result<(), StoreError> {
        write_record(&self.record_path(PROGRESS_DIR, &progress.id)?, progress)
    }

    fn remove_local_media_progress(&self, id: &str) -> Result<(), StoreError> {
        remove_record(&self.record_path(PROGRESS_DIR, id)?)
    }

    fn save_playback_session(&self, session: &PlaybackSession) -> Result<(), StoreError> {
        write_record(&self.record_path(SESSIONS_DIR, &session.id)?, session)
    }

    fn remove_playback_session(&self, id: &str) -> Result<(), StoreError> {
        remove_record(&self.record_path(SESSIONS_DIR, id)?)
    }

    fn playback_sessions(&self) -> Result<Vec<PlaybackSession>, StoreError> {
        read_all(&self.root.join(SESSIONS_DIR))
    }

    fn media_item_history(&self, id: &str) -> Result<Option<MediaItemHistory>, StoreError> {
        read_record(&self.record_path(HISTORY_DIR, id)?)
    }

    fn save_media_item_history(&self, history: &MediaItemHistory) -> Result<(), StoreError> {
        write_record(&self.record_path(HISTORY_DIR, &history.id)?, history)
    }

    fn device_settings(&self) -> Result<DeviceSettings, StoreError> {
        Ok(read_record(&self.root.join(SETTINGS_FILE))?.unwrap_or_default())
    }

    fn save_device_settings(&self, settings: &DeviceSettings) -> Result<(), StoreError> {
        write_record(&self.root.join(SETTINGS_FILE), settings)
    }
}
