// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::settings::DeviceSettings;
use crate::store::SharedStore;

use super::{SharedSleepTimerHost, fade_volume, is_within_auto_window};

/// What the sleep timer counts down to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTimerMode {
    /// Pause after `length_ms` of playing time
    Fixed { length_ms: i64 },
    /// Pause when the position reaches `end_time_ms`
    EndOfChapter { end_time_ms: i64 },
}

/// Timing knobs of the sleep timer
#[derive(Debug, Clone)]
pub struct SleepTimerOptions {
    pub tick_period: Duration,
    /// How long after running out a shake still restarts the timer
    pub grace_window: Duration,
    /// Remaining seconds at which the volume starts fading
    pub fade_window_seconds: i64,
    /// Remaining seconds at which the almost-done chime plays
    pub almost_done_chime_seconds: i64,
    /// Playing time a fixed timer needs before a shake restarts it
    pub reset_min_elapsed_ms: i64,
    /// Chapter ends closer than this roll over to the next chapter
    pub chapter_min_remaining_ms: i64,
    /// Shortest remaining time adjustments may leave
    pub min_remaining_ms: i64,
}

impl Default for SleepTimerOptions {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            grace_window: Duration::from_secs(120),
            fade_window_seconds: 60,
            almost_done_chime_seconds: 30,
            reset_min_elapsed_ms: 3000,
            chapter_min_remaining_ms: 10_000,
            min_remaining_ms: 1000,
        }
    }
}

/// Pauses playback after a fixed playing time or at the end of a chapter,
/// fading the volume out on the way.
///
/// Supports shake-to-reset, a grace window for restarting a timer that ran
/// out, and a daily auto-activation window from the device settings.
/// Operations spawn tokio tasks and must be called inside a runtime.
#[derive(Clone)]
pub struct SleepTimerManager {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    host: SharedSleepTimerHost,
    store: SharedStore,
    options: SleepTimerOptions,
    state: Mutex<TimerState>,
}

#[derive(Default)]
struct TimerState {
    task: Option<JoinHandle<()>>,
    generation: u64,
    running: bool,
    /// Last armed mode, kept after the timer ends so it can be restarted
    mode: Option<SleepTimerMode>,
    /// Playing time since the timer was armed
    elapsed_ms: i64,
    finished_at: Option<Instant>,
    is_auto: bool,
    /// The user cut the timer down to the minimum; it must not restart
    shortened_to_minimum: bool,
    session_id: Option<String>,
}

impl TimerState {
    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }
}

impl SleepTimerManager {
    pub fn new(host: SharedSleepTimerHost, store: SharedStore) -> Self {
        Self::with_options(host, store, SleepTimerOptions::default())
    }

    pub fn with_options(
        host: SharedSleepTimerHost,
        store: SharedStore,
        options: SleepTimerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                host,
                store,
                options,
                state: Mutex::new(TimerState::default()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().running
    }

    pub fn is_auto_timer(&self) -> bool {
        let state = self.inner.state();
        state.running && state.is_auto
    }

    /// Mode of the running timer
    pub fn mode(&self) -> Option<SleepTimerMode> {
        let state = self.inner.state();
        state.mode.filter(|_| state.running)
    }

    /// Seconds until the running timer pauses playback, 0 when idle
    pub fn remaining_seconds(&self) -> i64 {
        let state = self.inner.state();
        if state.running {
            self.inner.remaining_seconds(&state).max(0)
        } else {
            0
        }
    }

    /// Arm a manual timer for `session_id`
    ///
    /// With `is_chapter_time`, `time_ms` is an absolute end position, or 0 for
    /// the end of the current chapter or track. Otherwise it is a fixed
    /// playing time. Returns false, leaving any current timer untouched, when
    /// the target is invalid or already behind the playback position.
    pub fn set_sleep_timer(&self, session_id: &str, time_ms: i64, is_chapter_time: bool) -> bool {
        let mut state = self.inner.state();

        let mode = if is_chapter_time {
            let position = self.inner.host.current_time_ms();
            let end = if time_ms > 0 {
                Some(time_ms)
            } else {
                self.inner.chapter_end_time(position)
            };
            let Some(end) = end else {
                warn!("No chapter or track end to set the sleep timer to");
                return false;
            };
            if end < position {
                debug!(
                    "Invalid sleep timer, position {} is already past {}",
                    position, end
                );
                return false;
            }
            SleepTimerMode::EndOfChapter {
                end_time_ms: self.inner.clamp_to_duration(end),
            }
        } else if time_ms > 0 {
            SleepTimerMode::Fixed { length_ms: time_ms }
        } else {
            warn!("Invalid sleep timer length {}", time_ms);
            return false;
        };

        info!("Setting sleep timer {:?} for session {}", mode, session_id);
        state.session_id = Some(session_id.to_string());
        state.is_auto = false;
        self.arm(&mut state, mode);
        true
    }

    /// Extend the running timer by `delta_ms` of playing time
    ///
    /// The remaining time never exceeds what is left of the media.
    pub fn increase_sleep_time(&self, delta_ms: i64) {
        let mut state = self.inner.state();
        if !state.running {
            return;
        }
        debug!("Increasing sleep time by {}ms", delta_ms);

        let host = &self.inner.host;
        let position = host.current_time_ms();
        state.mode = match state.mode {
            Some(SleepTimerMode::Fixed { length_ms }) => {
                let max_length = state.elapsed_ms + (host.duration_ms() - position).max(0);
                Some(SleepTimerMode::Fixed {
                    length_ms: (length_ms + delta_ms).min(max_length),
                })
            }
            Some(SleepTimerMode::EndOfChapter { end_time_ms }) => {
                let shifted = end_time_ms + self.inner.scale_by_speed(delta_ms);
                Some(SleepTimerMode::EndOfChapter {
                    end_time_ms: self.inner.clamp_chapter_end(shifted, position),
                })
            }
            None => None,
        };
        state.shortened_to_minimum = false;
        self.inner.announce_adjustment(&state);
    }

    /// Shorten the running timer by `delta_ms` of playing time
    ///
    /// At least a second always remains.
    pub fn decrease_sleep_time(&self, delta_ms: i64) {
        let mut state = self.inner.state();
        if !state.running {
            return;
        }
        debug!("Decreasing sleep time by {}ms", delta_ms);

        let min_remaining = self.inner.options.min_remaining_ms;
        state.mode = match state.mode {
            Some(SleepTimerMode::Fixed { length_ms }) => {
                let floor = state.elapsed_ms + min_remaining;
                let wanted = length_ms - delta_ms;
                state.shortened_to_minimum = wanted <= floor;
                Some(SleepTimerMode::Fixed {
                    length_ms: wanted.max(floor),
                })
            }
            Some(SleepTimerMode::EndOfChapter { end_time_ms }) => {
                let position = self.inner.host.current_time_ms();
                let shifted = end_time_ms - self.inner.scale_by_speed(delta_ms);
                state.shortened_to_minimum = shifted <= position + min_remaining;
                Some(SleepTimerMode::EndOfChapter {
                    end_time_ms: self.inner.clamp_chapter_end(shifted, position),
                })
            }
            None => None,
        };
        self.inner.announce_adjustment(&state);
    }

    /// Stop the timer without pausing playback
    ///
    /// Cancelling an auto timer suppresses auto activation until the current
    /// window has passed.
    pub fn cancel_sleep_timer(&self) {
        let mut state = self.inner.state();
        debug!("Cancelling sleep timer");
        if state.running && state.is_auto {
            info!("Disabling auto sleep timer for this time period");
            self.inner.set_auto_suppressed(true);
        }
        self.inner.clear(&mut state);
        self.inner.host.on_sleep_timer_set(0, false);
    }

    /// React to a shake of the device
    ///
    /// Only while a timer runs during playback, or within the grace window
    /// after one ran out.
    pub fn handle_shake(&self) {
        let mut state = self.inner.state();
        let eligible =
            (state.running && self.inner.host.is_playing()) || state.finished_at.is_some();
        if !eligible {
            return;
        }

        let settings = self.inner.settings();
        if settings.disable_shake_to_reset_sleep_timer {
            debug!("Shake to reset sleep timer is disabled");
            return;
        }
        self.check_should_reset(&mut state, &settings);
    }

    /// Restart or re-target the timer after a shake or resumed playback
    pub fn check_should_reset_sleep_timer(&self) {
        let mut state = self.inner.state();
        let settings = self.inner.settings();
        self.check_should_reset(&mut state, &settings);
    }

    /// Arm an auto timer when the current wall-clock time is in the window
    pub fn check_auto_sleep_timer(&self) {
        self.check_auto_sleep_timer_at(Local::now().naive_local());
    }

    /// Arm an auto timer when `now` is in the configured daily window
    pub fn check_auto_sleep_timer_at(&self, now: NaiveDateTime) {
        let mut state = self.inner.state();
        if state.running {
            return;
        }

        let settings = self.inner.settings();
        if !settings.auto_sleep_timer {
            return;
        }
        let (start, end) = match (
            settings.auto_sleep_timer_start(),
            settings.auto_sleep_timer_end(),
        ) {
            (Ok(start), Ok(end)) => (start, end),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Auto sleep timer window is invalid: {}", e);
                return;
            }
        };
        let in_window = is_within_auto_window(start, end, now);

        if settings.auto_sleep_timer_suppressed {
            if in_window {
                info!("Auto sleep timer is disabled for this time period");
            } else {
                info!("Leaving disabled auto sleep time period, enabling for next time period");
                self.inner.set_auto_suppressed(false);
            }
            return;
        }
        if !in_window {
            debug!("Not in auto sleep time period");
            return;
        }

        let mode = if settings.sleep_timer_length > 0 {
            SleepTimerMode::Fixed {
                length_ms: settings.sleep_timer_length,
            }
        } else {
            let position = self.inner.host.current_time_ms();
            match self.inner.chapter_end_time(position) {
                Some(end) => SleepTimerMode::EndOfChapter {
                    end_time_ms: self.inner.clamp_to_duration(end),
                },
                None => {
                    warn!("No chapter or track end for the auto sleep timer");
                    return;
                }
            }
        };

        info!("Starting auto sleep timer at {}", now.format("%H:%M"));
        // Rewinds only when the previous timer was automatic as well
        self.inner.try_auto_rewind(&state, &settings);
        state.is_auto = true;
        self.arm(&mut state, mode);
    }

    /// Playback of `session_id` started or resumed
    pub fn handle_media_play_event(&self, session_id: &str) {
        {
            let mut state = self.inner.state();
            let same_session = state.session_id.as_deref() == Some(session_id);
            if same_session || state.running {
                let settings = self.inner.settings();
                self.check_should_reset(&mut state, &settings);
            } else if self.inner.settings().auto_sleep_timer_suppressed {
                debug!("New session {}, re-enabling auto sleep timer", session_id);
                self.inner.set_auto_suppressed(false);
            }
            state.session_id = Some(session_id.to_string());
        }

        self.check_auto_sleep_timer();
    }

    /// Re-send the timer state, e.g. when a UI comes back to the foreground
    pub fn send_current_sleep_timer_state(&self) {
        let state = self.inner.state();
        if state.running {
            let remaining = self.inner.remaining_seconds(&state).max(0);
            self.inner.host.on_sleep_timer_set(remaining, state.is_auto);
        } else {
            self.inner.host.on_sleep_timer_set(0, false);
        }
    }

    fn check_should_reset(&self, state: &mut TimerState, settings: &DeviceSettings) {
        let host = &self.inner.host;

        if state.running {
            match state.mode {
                Some(SleepTimerMode::Fixed { length_ms })
                    if state.elapsed_ms > self.inner.options.reset_min_elapsed_ms =>
                {
                    debug!("Resetting running sleep timer");
                    self.inner.reset_feedback(settings);
                    self.arm(state, SleepTimerMode::Fixed { length_ms });
                    host.play();
                }
                Some(SleepTimerMode::EndOfChapter { end_time_ms }) => {
                    let position = host.current_time_ms();
                    let Some(new_end) = self.inner.chapter_end_time(position) else {
                        return;
                    };
                    let new_end = self.inner.clamp_to_duration(new_end);
                    if new_end != end_time_ms {
                        info!(
                            "Chapter changed, moving sleep timer end from {} to {}",
                            end_time_ms, new_end
                        );
                        self.inner.reset_feedback(settings);
                        self.arm(
                            state,
                            SleepTimerMode::EndOfChapter {
                                end_time_ms: new_end,
                            },
                        );
                        host.play();
                    }
                }
                _ => {}
            }
            return;
        }

        let Some(finished_at) = state.finished_at else {
            return;
        };
        if finished_at.elapsed() > self.inner.options.grace_window {
            debug!("Sleep timer finished too long ago, clearing it");
            state.finished_at = None;
            return;
        }
        if state.shortened_to_minimum {
            debug!("Sleep timer ran out after being shortened manually, not restarting");
            state.finished_at = None;
            return;
        }

        let mode = match state.mode {
            Some(SleepTimerMode::Fixed { length_ms }) => SleepTimerMode::Fixed { length_ms },
            _ => {
                let position = host.current_time_ms();
                match self.inner.chapter_end_time(position) {
                    Some(end) => SleepTimerMode::EndOfChapter {
                        end_time_ms: self.inner.clamp_to_duration(end),
                    },
                    None => {
                        warn!("No chapter or track end to restart the sleep timer with");
                        return;
                    }
                }
            }
        };

        self.inner.try_auto_rewind(state, settings);
        debug!("Restarting finished sleep timer");
        self.inner.reset_feedback(settings);
        self.arm(state, mode);
        host.play();
    }

    fn arm(&self, state: &mut TimerState, mode: SleepTimerMode) {
        state.cancel_task();
        state.running = true;
        state.finished_at = None;
        state.elapsed_ms = 0;
        state.shortened_to_minimum = false;
        state.mode = Some(mode);

        let host = &self.inner.host;
        host.set_volume(1.0);
        host.register_motion_sensor();
        host.on_sleep_timer_set(self.inner.remaining_seconds(state).max(0), state.is_auto);

        state.task = Some(self.spawn_ticker(state.generation));
    }

    fn spawn_ticker(&self, generation: u64) -> JoinHandle<()> {
        let inner: Weak<TimerInner> = Arc::downgrade(&self.inner);
        let period = self.inner.options.tick_period;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if !inner.on_tick(generation) {
                    break;
                }
            }
        })
    }
}

impl TimerInner {
    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> DeviceSettings {
        self.store.device_settings().unwrap_or_else(|e| {
            warn!("Failed to read device settings, using defaults: {}", e);
            DeviceSettings::default()
        })
    }

    fn set_auto_suppressed(&self, suppressed: bool) {
        let mut settings = self.settings();
        if settings.auto_sleep_timer_suppressed == suppressed {
            return;
        }
        settings.auto_sleep_timer_suppressed = suppressed;
        if let Err(e) = self.store.save_device_settings(&settings) {
            error!("Failed to save auto sleep timer suppression: {}", e);
        }
    }

    /// One second of the countdown; returns false once the ticker is stale
    fn on_tick(&self, generation: u64) -> bool {
        let mut state = self.state();
        if state.generation != generation || !state.running {
            return false;
        }
        if !self.host.is_playing() {
            return true;
        }

        state.elapsed_ms += self.options.tick_period.as_millis() as i64;
        let remaining = self.remaining_seconds(&state);
        debug!(
            "Sleep timer elapsed {}ms, {}s remaining",
            state.elapsed_ms, remaining
        );
        self.host.on_sleep_timer_set(remaining.max(0), state.is_auto);

        if remaining <= 0 {
            info!("Sleep timer ran out, pausing playback");
            self.host.pause();
            self.host.on_sleep_timer_ended(self.host.current_time_ms());
            self.clear(&mut state);
            state.finished_at = Some(Instant::now());
            return false;
        }

        let chime_due = remaining == self.options.almost_done_chime_seconds;
        let fading = remaining <= self.options.fade_window_seconds;
        if chime_due || fading {
            let settings = self.settings();
            if chime_due && settings.enable_sleep_timer_almost_done_chime {
                self.host.play_almost_done_chime();
            }
            if fading && !settings.disable_sleep_timer_fade_out {
                let volume = fade_volume(remaining, self.options.fade_window_seconds);
                debug!("Sleep timer fade, volume {:.2}", volume);
                self.host.set_volume(volume);
                return true;
            }
        }
        self.host.set_volume(1.0);
        true
    }

    fn remaining_seconds(&self, state: &TimerState) -> i64 {
        match state.mode {
            Some(SleepTimerMode::Fixed { length_ms }) => (length_ms - state.elapsed_ms) / 1000,
            Some(SleepTimerMode::EndOfChapter { end_time_ms }) => {
                let seconds = (end_time_ms - self.host.current_time_ms()) / 1000;
                let speed = self.host.playback_speed();
                if speed > 0.0 {
                    (seconds as f64 / f64::from(speed)).round() as i64
                } else {
                    seconds
                }
            }
            None => 0,
        }
    }

    /// End of the current chapter or track, or of the next one when less
    /// than the minimum is left of the current one
    fn chapter_end_time(&self, position: i64) -> Option<i64> {
        let current_end = self.host.end_time_of_chapter_or_track()?;
        if current_end - position >= self.options.chapter_min_remaining_ms {
            return Some(current_end);
        }

        debug!("Current chapter ends within the minimum, using the next one");
        match self.host.end_time_of_next_chapter_or_track() {
            Some(next_end) if next_end != current_end => Some(next_end),
            other => {
                error!("Invalid next chapter end {:?}", other);
                None
            }
        }
    }

    fn clamp_to_duration(&self, end_ms: i64) -> i64 {
        let duration = self.host.duration_ms();
        if duration > 0 { end_ms.min(duration) } else { end_ms }
    }

    fn clamp_chapter_end(&self, end_ms: i64, position: i64) -> i64 {
        self.clamp_to_duration(end_ms.max(position + self.options.min_remaining_ms))
    }

    fn scale_by_speed(&self, delta_ms: i64) -> i64 {
        (delta_ms as f64 * f64::from(self.host.playback_speed())).round() as i64
    }

    fn announce_adjustment(&self, state: &TimerState) {
        self.host.set_volume(1.0);
        self.host
            .on_sleep_timer_set(self.remaining_seconds(state).max(0), state.is_auto);
    }

    fn try_auto_rewind(&self, state: &TimerState, settings: &DeviceSettings) {
        if state.is_auto && settings.auto_sleep_timer_auto_rewind {
            info!(
                "Auto sleep timer rewinding {}ms",
                settings.auto_sleep_timer_auto_rewind_time
            );
            self.host
                .seek_backward(settings.auto_sleep_timer_auto_rewind_time);
        }
    }

    fn reset_feedback(&self, settings: &DeviceSettings) {
        if !settings.disable_sleep_timer_reset_feedback {
            self.host.reset_feedback();
        }
    }

    fn clear(&self, state: &mut TimerState) {
        state.cancel_task();
        state.running = false;
        self.host.unregister_motion_sensor();
        self.host.set_volume(1.0);
    }
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PlaybackSession;
    use crate::session::playback::tests::make_book_session;
    use crate::sleep::{FADE_FLOOR, SleepTimerHost};
    use crate::store::{LocalStore, MemoryStore};
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// A player whose position either follows the paused tokio clock at its
    /// playback speed or stays where it was put
    struct MockPlayer {
        session: PlaybackSession,
        clock_start: Instant,
        base_ms: Mutex<i64>,
        follow_clock: AtomicBool,
        playing: AtomicBool,
        speed: Mutex<f32>,
        volumes: Mutex<Vec<f32>>,
        timer_sets: Mutex<Vec<(i64, bool)>>,
        ended: Mutex<Vec<i64>>,
        rewinds: Mutex<Vec<i64>>,
        sensor_registered: AtomicBool,
        feedbacks: AtomicUsize,
        chimes: AtomicUsize,
        plays: AtomicUsize,
        pauses: AtomicUsize,
    }

    impl MockPlayer {
        fn new() -> Self {
            Self {
                session: make_book_session("s1", 3600.0),
                clock_start: Instant::now(),
                base_ms: Mutex::new(0),
                follow_clock: AtomicBool::new(false),
                playing: AtomicBool::new(true),
                speed: Mutex::new(1.0),
                volumes: Mutex::new(Vec::new()),
                timer_sets: Mutex::new(Vec::new()),
                ended: Mutex::new(Vec::new()),
                rewinds: Mutex::new(Vec::new()),
                sensor_registered: AtomicBool::new(false),
                feedbacks: AtomicUsize::new(0),
                chimes: AtomicUsize::new(0),
                plays: AtomicUsize::new(0),
                pauses: AtomicUsize::new(0),
            }
        }

        fn at_position(self, position_ms: i64) -> Self {
            *self.base_ms.lock().unwrap() = position_ms;
            self
        }

        fn last_set(&self) -> (i64, bool) {
            *self.timer_sets.lock().unwrap().last().unwrap()
        }
    }

    impl SleepTimerHost for MockPlayer {
        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
        fn current_time_ms(&self) -> i64 {
            let base = *self.base_ms.lock().unwrap();
            if self.follow_clock.load(Ordering::SeqCst) {
                let speed = f64::from(*self.speed.lock().unwrap());
                base + (self.clock_start.elapsed().as_millis() as f64 * speed) as i64
            } else {
                base
            }
        }
        fn duration_ms(&self) -> i64 {
            self.session.total_duration_ms()
        }
        fn playback_speed(&self) -> f32 {
            *self.speed.lock().unwrap()
        }
        fn set_volume(&self, volume: f32) {
            self.volumes.lock().unwrap().push(volume);
        }
        fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            self.playing.store(false, Ordering::SeqCst);
        }
        fn play(&self) {
            self.plays.fetch_add(1, Ordering::SeqCst);
            self.playing.store(true, Ordering::SeqCst);
        }
        fn seek_backward(&self, amount_ms: i64) {
            self.rewinds.lock().unwrap().push(amount_ms);
        }
        fn end_time_of_chapter_or_track(&self) -> Option<i64> {
            self.session
                .end_of_chapter_or_track_ms(self.current_time_ms())
        }
        fn end_time_of_next_chapter_or_track(&self) -> Option<i64> {
            self.session
                .end_of_next_chapter_or_track_ms(self.current_time_ms())
        }
        fn register_motion_sensor(&self) {
            self.sensor_registered.store(true, Ordering::SeqCst);
        }
        fn unregister_motion_sensor(&self) {
            self.sensor_registered.store(false, Ordering::SeqCst);
        }
        fn reset_feedback(&self) {
            self.feedbacks.fetch_add(1, Ordering::SeqCst);
        }
        fn play_almost_done_chime(&self) {
            self.chimes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_sleep_timer_set(&self, remaining_seconds: i64, is_auto: bool) {
            self.timer_sets
                .lock()
                .unwrap()
                .push((remaining_seconds, is_auto));
        }
        fn on_sleep_timer_ended(&self, position_ms: i64) {
            self.ended.lock().unwrap().push(position_ms);
        }
    }

    fn manager_with(player: MockPlayer) -> (SleepTimerManager, Arc<MockPlayer>, Arc<MemoryStore>) {
        let player = Arc::new(player);
        let store = Arc::new(MemoryStore::new());
        let manager = SleepTimerManager::new(player.clone(), store.clone());
        (manager, player, store)
    }

    fn night_settings() -> DeviceSettings {
        DeviceSettings {
            auto_sleep_timer: true,
            sleep_timer_length: 2000,
            ..DeviceSettings::default()
        }
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_timer_pauses_after_length() {
        let player = MockPlayer::new();
        player.follow_clock.store(true, Ordering::SeqCst);
        let (manager, player, _store) = manager_with(player);

        assert!(manager.set_sleep_timer("s1", 600_000, false));
        assert_eq!(player.last_set(), (600, false));
        assert!(player.sensor_registered.load(Ordering::SeqCst));

        time::sleep(Duration::from_millis(600_500)).await;

        assert_eq!(*player.ended.lock().unwrap(), vec![600_000]);
        assert_eq!(player.pauses.load(Ordering::SeqCst), 1);
        assert!(!manager.is_running());
        assert!(!player.sensor_registered.load(Ordering::SeqCst));
        assert_eq!(player.last_set(), (0, false));

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(player.ended.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_only_advances_while_playing() {
        let (manager, player, _store) = manager_with(MockPlayer::new());
        player.playing.store(false, Ordering::SeqCst);

        manager.set_sleep_timer("s1", 60_000, false);
        time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(manager.remaining_seconds(), 60);

        player.playing.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.remaining_seconds(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn fade_stays_within_bounds() {
        let (manager, player, store) = manager_with(MockPlayer::new());
        store
            .save_device_settings(&DeviceSettings {
                enable_sleep_timer_almost_done_chime: true,
                ..DeviceSettings::default()
            })
            .unwrap();

        manager.set_sleep_timer("s1", 65_000, false);
        time::sleep(Duration::from_millis(64_500)).await;

        let volumes = player.volumes.lock().unwrap().clone();
        assert!(volumes.len() > 60);
        assert!(volumes.iter().all(|v| (FADE_FLOOR..=1.0).contains(v)));
        assert!(volumes.windows(2).all(|pair| pair[1] <= pair[0]));
        assert!(*volumes.last().unwrap() < 0.2);
        assert_eq!(player.chimes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_fade_keeps_full_volume() {
        let (manager, player, store) = manager_with(MockPlayer::new());
        store
            .save_device_settings(&DeviceSettings {
                disable_sleep_timer_fade_out: true,
                ..DeviceSettings::default()
            })
            .unwrap();

        manager.set_sleep_timer("s1", 10_000, false);
        time::sleep(Duration::from_millis(9_500)).await;

        assert!(player.volumes.lock().unwrap().iter().all(|v| *v == 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn chapter_timer_counts_down_in_real_time_at_speed() {
        let player = MockPlayer::new().at_position(1_740_000);
        *player.speed.lock().unwrap() = 2.0;
        player.follow_clock.store(true, Ordering::SeqCst);
        let (manager, player, _store) = manager_with(player);

        // A minute of media to the chapter end is half a minute at 2x
        assert!(manager.set_sleep_timer("s1", 0, true));
        assert_eq!(player.last_set(), (30, false));

        time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(player.last_set(), (20, false));

        time::sleep(Duration::from_secs(19)).await;
        assert_eq!(player.last_set(), (1, false));
        assert_eq!(player.pauses.load(Ordering::SeqCst), 0);
        assert!(player.ended.lock().unwrap().is_empty());

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(player.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(*player.ended.lock().unwrap(), vec![1_800_000]);
        assert_eq!(player.last_set(), (0, false));
        assert!(!manager.is_running());
        assert!(!player.sensor_registered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn chapter_target_behind_position_is_rejected() {
        let (manager, player, _store) = manager_with(MockPlayer::new().at_position(2_000_000));

        assert!(!manager.set_sleep_timer("s1", 1_000_000, true));
        assert!(!manager.is_running());
        assert!(player.timer_sets.lock().unwrap().is_empty());
        assert!(!player.sensor_registered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn chapter_timer_rolls_over_near_chapter_end() {
        let (manager, _player, _store) = manager_with(MockPlayer::new().at_position(1_000_000));
        assert!(manager.set_sleep_timer("s1", 0, true));
        assert_eq!(
            manager.mode(),
            Some(SleepTimerMode::EndOfChapter {
                end_time_ms: 1_800_000
            })
        );

        let (manager, _player, _store) = manager_with(MockPlayer::new().at_position(1_795_000));
        assert!(manager.set_sleep_timer("s1", 0, true));
        assert_eq!(
            manager.mode(),
            Some(SleepTimerMode::EndOfChapter {
                end_time_ms: 3_600_000
            })
        );
    }

    #[tokio::test]
    async fn chapter_target_is_clamped_to_duration() {
        let (manager, _player, _store) = manager_with(MockPlayer::new());
        assert!(manager.set_sleep_timer("s1", 9_000_000, true));
        assert_eq!(
            manager.mode(),
            Some(SleepTimerMode::EndOfChapter {
                end_time_ms: 3_600_000
            })
        );
    }

    #[tokio::test]
    async fn increase_never_exceeds_rest_of_media() {
        let (manager, player, _store) = manager_with(MockPlayer::new().at_position(3_500_000));
        manager.set_sleep_timer("s1", 60_000, false);

        manager.increase_sleep_time(600_000);
        assert_eq!(manager.remaining_seconds(), 100);
        assert_eq!(player.last_set(), (100, false));
    }

    #[tokio::test]
    async fn decrease_leaves_at_least_a_second() {
        let (manager, _player, _store) = manager_with(MockPlayer::new());
        manager.set_sleep_timer("s1", 600_000, false);

        manager.decrease_sleep_time(900_000);
        assert_eq!(manager.remaining_seconds(), 1);
    }

    #[tokio::test]
    async fn idle_adjustments_are_ignored() {
        let (manager, player, _store) = manager_with(MockPlayer::new());
        manager.increase_sleep_time(60_000);
        manager.decrease_sleep_time(60_000);
        assert!(player.timer_sets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chapter_adjustments_scale_with_speed() {
        let (manager, player, _store) = manager_with(MockPlayer::new().at_position(1_000_000));
        *player.speed.lock().unwrap() = 2.0;
        manager.set_sleep_timer("s1", 0, true);

        manager.increase_sleep_time(60_000);
        assert_eq!(
            manager.mode(),
            Some(SleepTimerMode::EndOfChapter {
                end_time_ms: 1_920_000
            })
        );

        manager.decrease_sleep_time(2_000_000);
        assert_eq!(
            manager.mode(),
            Some(SleepTimerMode::EndOfChapter {
                end_time_ms: 1_001_000
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shake_restarts_within_grace_window() {
        let (manager, player, _store) = manager_with(MockPlayer::new());
        manager.set_sleep_timer("s1", 5_000, false);
        time::sleep(Duration::from_millis(5_500)).await;
        assert!(!manager.is_running());

        time::sleep(Duration::from_secs(60)).await;
        manager.handle_shake();

        assert!(manager.is_running());
        assert_eq!(manager.remaining_seconds(), 5);
        assert_eq!(player.plays.load(Ordering::SeqCst), 1);
        assert_eq!(player.feedbacks.load(Ordering::SeqCst), 1);
        // Manual timers never rewind
        assert!(player.rewinds.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shake_after_grace_window_does_nothing() {
        let (manager, player, _store) = manager_with(MockPlayer::new());
        manager.set_sleep_timer("s1", 5_000, false);
        time::sleep(Duration::from_millis(5_500)).await;

        time::sleep(Duration::from_secs(121)).await;
        manager.handle_shake();
        assert!(!manager.is_running());
        assert_eq!(player.plays.load(Ordering::SeqCst), 0);

        // The finish marker is gone for good
        manager.handle_shake();
        assert!(!manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_shortened_to_minimum_is_not_restarted() {
        let (manager, _player, _store) = manager_with(MockPlayer::new());
        manager.set_sleep_timer("s1", 600_000, false);
        manager.decrease_sleep_time(900_000);

        time::sleep(Duration::from_millis(1_500)).await;
        assert!(!manager.is_running());

        manager.handle_shake();
        assert!(!manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn shake_resets_running_fixed_timer() {
        let (manager, player, _store) = manager_with(MockPlayer::new());
        manager.set_sleep_timer("s1", 60_000, false);

        time::sleep(Duration::from_millis(2_500)).await;
        manager.handle_shake();
        assert_eq!(manager.remaining_seconds(), 58);

        time::sleep(Duration::from_secs(2)).await;
        manager.handle_shake();
        assert_eq!(manager.remaining_seconds(), 60);
        assert_eq!(player.feedbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_shake_is_ignored() {
        let (manager, _player, store) = manager_with(MockPlayer::new());
        store
            .save_device_settings(&DeviceSettings {
                disable_shake_to_reset_sleep_timer: true,
                ..DeviceSettings::default()
            })
            .unwrap();
        manager.set_sleep_timer("s1", 60_000, false);

        time::sleep(Duration::from_millis(5_500)).await;
        manager.handle_shake();
        assert_eq!(manager.remaining_seconds(), 55);
    }

    #[tokio::test]
    async fn chapter_timer_follows_chapter_change() {
        let (manager, player, _store) = manager_with(MockPlayer::new().at_position(1_000_000));
        manager.set_sleep_timer("s1", 0, true);

        *player.base_ms.lock().unwrap() = 2_000_000;
        manager.check_should_reset_sleep_timer();
        assert_eq!(
            manager.mode(),
            Some(SleepTimerMode::EndOfChapter {
                end_time_ms: 3_600_000
            })
        );
        assert_eq!(player.feedbacks.load(Ordering::SeqCst), 1);

        // Same chapter, nothing to re-target
        manager.check_should_reset_sleep_timer();
        assert_eq!(player.feedbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auto_timer_starts_inside_window_only() {
        let (manager, player, store) = manager_with(MockPlayer::new());
        store.save_device_settings(&night_settings()).unwrap();

        manager.check_auto_sleep_timer_at(at(12, 0));
        assert!(!manager.is_running());

        manager.check_auto_sleep_timer_at(at(23, 0));
        assert!(manager.is_auto_timer());
        assert_eq!(player.last_set(), (2, true));
    }

    #[tokio::test]
    async fn cancelling_auto_timer_suppresses_until_window_ends() {
        let (manager, player, store) = manager_with(MockPlayer::new());
        store.save_device_settings(&night_settings()).unwrap();

        manager.check_auto_sleep_timer_at(at(23, 0));
        manager.cancel_sleep_timer();
        assert_eq!(player.last_set(), (0, false));
        assert!(store.device_settings().unwrap().auto_sleep_timer_suppressed);

        manager.check_auto_sleep_timer_at(at(23, 30));
        assert!(!manager.is_running());

        manager.check_auto_sleep_timer_at(at(12, 0));
        assert!(!store.device_settings().unwrap().auto_sleep_timer_suppressed);

        manager.check_auto_sleep_timer_at(at(23, 45));
        assert!(manager.is_auto_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_rewind_applies_to_restarted_auto_timer() {
        let (manager, player, store) = manager_with(MockPlayer::new());
        store
            .save_device_settings(&DeviceSettings {
                auto_sleep_timer_auto_rewind: true,
                ..night_settings()
            })
            .unwrap();

        manager.check_auto_sleep_timer_at(at(23, 0));
        assert!(player.rewinds.lock().unwrap().is_empty());

        time::sleep(Duration::from_millis(2_500)).await;
        assert!(!manager.is_running());

        manager.handle_shake();
        assert!(manager.is_running());
        assert_eq!(*player.rewinds.lock().unwrap(), vec![300_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn play_event_for_same_session_resets_timer() {
        let (manager, _player, _store) = manager_with(MockPlayer::new());
        manager.set_sleep_timer("s1", 60_000, false);

        time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(manager.remaining_seconds(), 50);

        manager.handle_media_play_event("s1");
        assert_eq!(manager.remaining_seconds(), 60);
    }

    #[tokio::test]
    async fn play_event_for_new_session_lifts_suppression() {
        let (manager, _player, store) = manager_with(MockPlayer::new());
        store
            .save_device_settings(&DeviceSettings {
                auto_sleep_timer_suppressed: true,
                ..DeviceSettings::default()
            })
            .unwrap();

        manager.handle_media_play_event("s2");
        assert!(!store.device_settings().unwrap().auto_sleep_timer_suppressed);
    }

    #[tokio::test]
    async fn current_state_is_resent() {
        let (manager, player, _store) = manager_with(MockPlayer::new());
        manager.send_current_sleep_timer_state();
        assert_eq!(player.last_set(), (0, false));

        manager.set_sleep_timer("s1", 90_000, false);
        manager.send_current_sleep_timer_state();
        assert_eq!(player.last_set(), (90, false));
    }
}
