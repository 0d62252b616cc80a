// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::LocalMediaProgress;
use crate::sync::SyncData;

/// How the audio of a session reaches the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PlayMethod {
    DirectPlay,
    DirectStream,
    Transcode,
    Local,
}

/// Raised when a numeric play method is outside the known range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownPlayMethod(pub u8);

impl fmt::Display for UnknownPlayMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown play method {}", self.0)
    }
}

impl TryFrom<u8> for PlayMethod {
    type Error = UnknownPlayMethod;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PlayMethod::DirectPlay),
            1 => Ok(PlayMethod::DirectStream),
            2 => Ok(PlayMethod::Transcode),
            3 => Ok(PlayMethod::Local),
            other => Err(UnknownPlayMethod(other)),
        }
    }
}

impl From<PlayMethod> for u8 {
    fn from(method: PlayMethod) -> Self {
        match method {
            PlayMethod::DirectPlay => 0,
            PlayMethod::DirectStream => 1,
            PlayMethod::Transcode => 2,
            PlayMethod::Local => 3,
        }
    }
}

/// A chapter of a book, in seconds from the start of the book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    #[serde(default)]
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub title: String,
}

impl Chapter {
    pub fn start_ms(&self) -> i64 {
        seconds_to_ms(self.start)
    }

    pub fn end_ms(&self) -> i64 {
        seconds_to_ms(self.end)
    }
}

/// One audio file of a session, positioned on the session timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub index: u32,
    pub start_offset: f64,
    pub duration: f64,
    #[serde(default)]
    pub content_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl AudioTrack {
    pub fn start_offset_ms(&self) -> i64 {
        seconds_to_ms(self.start_offset)
    }

    pub fn end_offset_ms(&self) -> i64 {
        seconds_to_ms(self.start_offset + self.duration)
    }
}

/// What kind of media a session plays, with the fields specific to each kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mediaType", rename_all = "lowercase")]
pub enum Media {
    Book {
        #[serde(default)]
        chapters: Vec<Chapter>,
    },
    Podcast {
        #[serde(rename = "episodeId")]
        episode_id: String,
    },
}

/// One contiguous playback attempt of a library item or podcast episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSession {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub library_item_id: Option<String>,
    #[serde(flatten)]
    pub media: Media,
    #[serde(default)]
    pub display_title: Option<String>,
    pub duration: f64,
    pub current_time: f64,
    /// Seconds of listening accumulated over the lifetime of the session
    #[serde(default)]
    pub time_listening: u64,
    pub play_method: PlayMethod,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
    #[serde(default)]
    pub local_library_item_id: Option<String>,
    #[serde(default)]
    pub local_episode_id: Option<String>,
    #[serde(default)]
    pub server_connection_config_id: Option<String>,
    #[serde(default)]
    pub server_address: Option<String>,
}

impl PlaybackSession {
    pub fn display_title_or_unset(&self) -> &str {
        self.display_title.as_deref().unwrap_or("Unset")
    }

    pub fn is_local(&self) -> bool {
        self.play_method == PlayMethod::Local
    }

    pub fn is_podcast_episode(&self) -> bool {
        matches!(self.media, Media::Podcast { .. })
    }

    pub fn episode_id(&self) -> Option<&str> {
        match &self.media {
            Media::Book { .. } => None,
            Media::Podcast { episode_id } => Some(episode_id),
        }
    }

    pub fn chapters(&self) -> &[Chapter] {
        match &self.media {
            Media::Book { chapters } => chapters,
            Media::Podcast { .. } => &[],
        }
    }

    /// Total duration in seconds, taken from the tracks when there are any
    pub fn total_duration(&self) -> f64 {
        if self.audio_tracks.is_empty() {
            self.duration
        } else {
            self.audio_tracks.iter().map(|track| track.duration).sum()
        }
    }

    pub fn current_time_ms(&self) -> i64 {
        seconds_to_ms(self.current_time)
    }

    pub fn total_duration_ms(&self) -> i64 {
        seconds_to_ms(self.total_duration())
    }

    /// Fraction of the session that has been listened to
    ///
    /// Returns `None` when the fraction is not a finite number, which happens
    /// for sessions without a duration.
    pub fn progress(&self) -> Option<f64> {
        let progress = self.current_time / self.total_duration();
        progress.is_finite().then(|| progress.clamp(0.0, 1.0))
    }

    /// Server-side media item id (`libraryItemId` or `libraryItemId-episodeId`)
    pub fn media_item_id(&self) -> Option<String> {
        let library_item_id = self.library_item_id.as_deref()?;
        Some(match self.episode_id() {
            Some(episode_id) if !episode_id.is_empty() => {
                format!("{library_item_id}-{episode_id}")
            }
            _ => library_item_id.to_string(),
        })
    }

    /// Key of the local progress record for this session
    pub fn local_media_progress_id(&self) -> String {
        let local_item_id = self.local_library_item_id.as_deref().unwrap_or("");
        match self.local_episode_id.as_deref() {
            Some(episode_id) if !episode_id.is_empty() => format!("{local_item_id}-{episode_id}"),
            _ => local_item_id.to_string(),
        }
    }

    /// Apply a sync payload: accumulate listening time and move the position
    pub fn apply_sync_data(&mut self, data: &SyncData) {
        self.time_listening += data.time_listened;
        self.current_time = data.current_time;
        self.updated_at = Utc::now();
    }

    /// Build a fresh progress record for a local session
    pub fn new_local_media_progress(&self) -> LocalMediaProgress {
        LocalMediaProgress {
            id: self.local_media_progress_id(),
            local_library_item_id: self.local_library_item_id.clone().unwrap_or_default(),
            local_episode_id: self.local_episode_id.clone(),
            duration: self.total_duration(),
            progress: self.progress().unwrap_or(f64::NAN),
            current_time: self.current_time,
            is_finished: false,
            last_update: self.updated_at,
            started_at: self.started_at,
            finished_at: None,
            server_connection_config_id: self.server_connection_config_id.clone(),
            server_address: self.server_address.clone(),
            server_user_id: self.user_id.clone(),
            library_item_id: self.library_item_id.clone(),
            episode_id: self.episode_id().map(String::from),
        }
    }

    /// Chapter containing the given time
    pub fn chapter_at(&self, time_ms: i64) -> Option<&Chapter> {
        self.chapters()
            .iter()
            .find(|chapter| time_ms >= chapter.start_ms() && chapter.end_ms() > time_ms)
    }

    /// First chapter starting after the given time
    pub fn next_chapter_after(&self, time_ms: i64) -> Option<&Chapter> {
        self.chapters()
            .iter()
            .find(|chapter| time_ms < chapter.start_ms())
    }

    fn track_index_at(&self, time_ms: i64) -> Option<usize> {
        let last = self.audio_tracks.len().checked_sub(1)?;
        Some(
            self.audio_tracks
                .iter()
                .position(|track| {
                    time_ms >= track.start_offset_ms() && track.end_offset_ms() > time_ms
                })
                .unwrap_or(last),
        )
    }

    fn next_track_index_after(&self, time_ms: i64) -> Option<usize> {
        let last = self.audio_tracks.len().checked_sub(1)?;
        Some(
            self.audio_tracks
                .iter()
                .position(|track| time_ms < track.start_offset_ms())
                .unwrap_or(last),
        )
    }

    /// Absolute end (ms) of the chapter at `time_ms`, or of its track when the
    /// media has no chapters there
    pub fn end_of_chapter_or_track_ms(&self, time_ms: i64) -> Option<i64> {
        if let Some(chapter) = self.chapter_at(time_ms) {
            return Some(chapter.end_ms());
        }
        self.track_index_at(time_ms)
            .map(|index| self.audio_tracks[index].end_offset_ms())
    }

    /// Absolute end (ms) of the chapter or track following the one at `time_ms`
    pub fn end_of_next_chapter_or_track_ms(&self, time_ms: i64) -> Option<i64> {
        if let Some(chapter) = self.next_chapter_after(time_ms) {
            return Some(chapter.end_ms());
        }
        self.next_track_index_after(time_ms)
            .map(|index| self.audio_tracks[index].end_offset_ms())
    }
}

pub(crate) fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0) as i64
}
