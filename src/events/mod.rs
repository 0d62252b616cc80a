mod history;
mod manager;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::PlaybackSession;
use crate::sync::SyncResult;

pub use history::{MediaItemEvent, MediaItemEventType, MediaItemHistory};
pub use manager::{EventManager, HistoryListener, SharedHistoryListener};

/// Lifecycle events emitted for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackEventKind {
    Play,
    Pause,
    Stop,
    Save,
    Finished,
    Seek,
}

impl PlaybackEventKind {
    /// Terminal events are emitted even when no sync result is available
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlaybackEventKind::Pause | PlaybackEventKind::Stop | PlaybackEventKind::Finished
        )
    }

    /// Display name used in the history log
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackEventKind::Play => "Play",
            PlaybackEventKind::Pause => "Pause",
            PlaybackEventKind::Stop => "Stop",
            PlaybackEventKind::Save => "Save",
            PlaybackEventKind::Finished => "Finished",
            PlaybackEventKind::Seek => "Seek",
        }
    }
}

impl fmt::Display for PlaybackEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who triggered a play or pause
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackEventSource {
    #[default]
    System,
    User,
}

/// A lifecycle event with the session as of emission
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub kind: PlaybackEventKind,
    pub session: PlaybackSession,
    /// Outcome of the sync that preceded the event, if one ran
    pub sync_result: Option<SyncResult>,
    pub source: PlaybackEventSource,
}

/// Receiver of playback lifecycle events.
///
/// Implementations must return quickly; they are called while the syncer
/// holds its state.
pub trait EventSink: Send + Sync {
    fn on_playback_event(&self, event: &PlaybackEvent);
}

/// A shared reference to an event sink
pub type SharedEventSink = Arc<dyn EventSink>;

/// An event sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_playback_event(&self, _event: &PlaybackEvent) {}
}

impl NoopSink {
    /// Create a new NoopSink wrapped in an Arc
    pub fn shared() -> SharedEventSink {
        Arc::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_kinds() {
        assert!(PlaybackEventKind::Pause.is_terminal());
        assert!(PlaybackEventKind::Stop.is_terminal());
        assert!(PlaybackEventKind::Finished.is_terminal());
        assert!(!PlaybackEventKind::Save.is_terminal());
        assert!(!PlaybackEventKind::Play.is_terminal());
        assert!(!PlaybackEventKind::Seek.is_terminal());
    }

    #[test]
    fn kinds_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&PlaybackEventKind::Finished).unwrap(),
            "\"finished\""
        );
        assert_eq!(PlaybackEventKind::Finished.to_string(), "Finished");
    }
}
