use std::sync::Arc;

use crate::session::LocalMediaProgress;

/// View of the player and device that the progress syncer polls.
///
/// Implemented by the platform layer. Readers may be called from the sync
/// task concurrently with other tasks, so implementations must be safe for
/// concurrent reads.
pub trait TelemetryHost: Send + Sync {
    /// Whether the player is currently playing
    fn is_player_active(&self) -> bool;

    /// Playback position in seconds
    fn current_time_seconds(&self) -> f64;

    /// Whether the active connection is unmetered (e.g. wifi)
    fn is_unmetered_network(&self) -> bool;

    fn has_network_connection(&self) -> bool;

    /// Id of the server connection config the device is connected to, if any
    fn connected_server_config_id(&self) -> Option<String>;

    fn is_sleep_timer_active(&self) -> bool;

    /// Ask the sleep timer to check whether its auto window has started
    fn check_auto_sleep_timer(&self);

    fn alert_sync_success(&self);

    /// Surface to the user that progress is repeatedly failing to reach the server
    fn alert_sync_failing(&self);

    fn notify_local_progress_update(&self, progress: &LocalMediaProgress);
}

/// A shared reference to a telemetry host
pub type SharedTelemetryHost = Arc<dyn TelemetryHost>;
