/// Lowest volume the fade-out reaches, so the audio stays perceptible
pub const FADE_FLOOR: f32 = 0.1;

/// Volume for `remaining_seconds` left on the timer
///
/// Full volume outside the fade window, then a linear ramp down to
/// [`FADE_FLOOR`] as the timer runs out.
pub fn fade_volume(remaining_seconds: i64, fade_window_seconds: i64) -> f32 {
    if fade_window_seconds <= 0 || remaining_seconds >= fade_window_seconds {
        return 1.0;
    }
    let reduce = 1.0 - remaining_seconds.max(0) as f32 / fade_window_seconds as f32;
    1.0 - reduce * (1.0 - FADE_FLOOR)
}
