use std::sync::Arc;

/// Player controls and notifications the sleep timer drives.
///
/// Times are milliseconds on the session timeline. Callbacks run while the
/// timer state is locked, so implementations must not call back into the
/// sleep timer manager.
pub trait SleepTimerHost: Send + Sync {
    fn is_playing(&self) -> bool;

    fn current_time_ms(&self) -> i64;

    fn duration_ms(&self) -> i64;

    fn playback_speed(&self) -> f32;

    /// Set the player volume, 0.0 to 1.0
    fn set_volume(&self, volume: f32);

    fn pause(&self);

    fn play(&self);

    fn seek_backward(&self, amount_ms: i64);

    /// End of the current chapter, or of the current track without chapters
    fn end_time_of_chapter_or_track(&self) -> Option<i64>;

    /// End of the chapter or track after the current one
    fn end_time_of_next_chapter_or_track(&self) -> Option<i64>;

    /// Start listening for shakes
    fn register_motion_sensor(&self);

    fn unregister_motion_sensor(&self);

    /// Haptic confirmation that a shake reset the timer
    fn reset_feedback(&self);

    fn play_almost_done_chime(&self);

    /// Timer armed, adjusted or ticked; 0 seconds means no timer
    fn on_sleep_timer_set(&self, remaining_seconds: i64, is_auto: bool);

    /// Timer ran out and paused playback at `position_ms`
    fn on_sleep_timer_ended(&self, position_ms: i64);
}

/// A shared reference to a sleep timer host
pub type SharedSleepTimerHost = Arc<dyn SleepTimerHost>;
