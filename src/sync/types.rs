use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Message attached to results of syncs skipped because the server closed the session
pub const SERVER_SESSION_CLOSED: &str = "server_session_closed";

/// Progress payload sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    /// Seconds listened since the last successful server sync
    pub time_listened: u64,
    /// Total duration in seconds
    pub duration: f64,
    /// Playback position in seconds
    pub current_time: f64,
}

/// Outcome of one sync attempt, attached to the event that follows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub server_sync_attempted: bool,
    pub server_sync_success: Option<bool>,
    pub server_sync_message: Option<String>,
}

impl SyncResult {
    /// Local save only, the server was not contacted
    pub fn not_attempted() -> Self {
        Self {
            server_sync_attempted: false,
            server_sync_success: None,
            server_sync_message: None,
        }
    }

    pub fn attempted(success: bool, message: Option<String>) -> Self {
        Self {
            server_sync_attempted: true,
            server_sync_success: Some(success),
            server_sync_message: message,
        }
    }

    /// The server already closed this session; no attempt was made
    pub fn server_session_closed() -> Self {
        Self {
            server_sync_attempted: false,
            server_sync_success: None,
            server_sync_message: Some(SERVER_SESSION_CLOSED.to_string()),
        }
    }
}

/// Timing and throttling knobs of the progress syncer
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Period of the sync loop while playing
    pub sync_interval: Duration,
    /// Minimum time between server syncs on a metered connection
    pub metered_server_sync_interval: Duration,
    /// Unforced syncs closer together than this are dropped
    pub min_sync_gap: Duration,
    /// Upper end of the window in which unforced syncs need position progress
    pub stall_window: Duration,
    /// Position advance (seconds) required inside the stall window
    pub min_position_advance: f64,
    /// Consecutive failed server syncs that raise a failing alert
    pub failures_before_alert: u32,
    /// How long a position set manually in the UI overrides the player position
    pub manual_time_ttl: Duration,
    /// Upper bound for a single server request, so pause and stop never hang
    pub request_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(15),
            metered_server_sync_interval: Duration::from_secs(60),
            min_sync_gap: Duration::from_millis(1000),
            stall_window: Duration::from_millis(5000),
            min_position_advance: 0.5,
            failures_before_alert: 2,
            manual_time_ttl: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_data_uses_server_field_names() {
        let data = SyncData {
            time_listened: 15,
            duration: 3600.0,
            current_time: 15.0,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["timeListened"], 15);
        assert_eq!(json["currentTime"], 15.0);
    }

    #[test]
    fn result_constructors() {
        assert!(!SyncResult::not_attempted().server_sync_attempted);
        assert_eq!(
            SyncResult::attempted(true, None).server_sync_success,
            Some(true)
        );
        assert_eq!(
            SyncResult::server_session_closed()
                .server_sync_message
                .as_deref(),
            Some(SERVER_SESSION_CLOSED)
        );
    }
}
