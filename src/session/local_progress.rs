// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::PlaybackSession;

/// Progress at or above which an item counts as finished
pub const FINISHED_PROGRESS_THRESHOLD: f64 = 0.99;

/// Listening progress of an item whose audio lives on the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMediaProgress {
    /// Local item id, or `{localItemId}-{localEpisodeId}` for podcast episodes
    pub id: String,
    pub local_library_item_id: String,
    #[serde(default)]
    pub local_episode_id: Option<String>,
    pub duration: f64,
    /// Fraction listened, 0 to 1
    pub progress: f64,
    pub current_time: f64,
    pub is_finished: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_update: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_connection_config_id: Option<String>,
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default)]
    pub server_user_id: Option<String>,
    #[serde(default)]
    pub library_item_id: Option<String>,
    #[serde(default)]
    pub episode_id: Option<String>,
}

impl LocalMediaProgress {
    pub fn progress_percent(&self) -> u32 {
        if self.progress.is_nan() {
            0
        } else {
            (self.progress * 100.0).round() as u32
        }
    }

    /// Server media item id when linked, otherwise the local id
    pub fn media_item_id(&self) -> String {
        match self.library_item_id.as_deref() {
            Some(library_item_id) => match self.episode_id.as_deref() {
                Some(episode_id) if !episode_id.is_empty() => {
                    format!("{library_item_id}-{episode_id}")
                }
                _ => library_item_id.to_string(),
            },
            None => self.id.clone(),
        }
    }

    /// Whether this record can be pushed to a server library item
    pub fn is_server_linked(&self) -> bool {
        self.server_connection_config_id.is_some()
            && self
                .library_item_id
                .as_deref()
                .is_some_and(|id| !id.is_empty())
    }

    /// Mirror the position of a session into this record
    pub fn update_from_playback_session(&mut self, session: &PlaybackSession) {
        self.current_time = session.current_time;
        self.progress = session.progress().unwrap_or(f64::NAN);
        self.last_update = session.updated_at;
        self.is_finished = self.progress >= FINISHED_PROGRESS_THRESHOLD;
        self.finished_at = self.is_finished.then_some(self.last_update);
    }

    /// Explicitly mark the item finished or unfinished
    pub fn update_is_finished(&mut self, finished: bool) {
        if self.is_finished != finished {
            self.progress = if finished { 1.0 } else { 0.0 };
        }
        self.is_finished = finished;
        self.last_update = Utc::now();
        self.finished_at = finished.then_some(self.last_update);
    }
}
