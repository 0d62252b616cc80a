// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::events::{PlaybackEvent, PlaybackEventKind, PlaybackEventSource, SharedEventSink};
use crate::http::SharedApiClient;
use crate::session::{LocalMediaProgress, PlaybackSession};
use crate::store::SharedStore;
use crate::telemetry::SharedTelemetryHost;

use super::{SyncData, SyncOptions, SyncResult};

/// Keeps the progress of the current playback session durable and pushed to
/// the server while it plays.
///
/// Cloning is cheap; clones drive the same session. All operations are
/// serialized on an internal lock, so a sync never interleaves with another
/// sync, a pause or a session switch.
#[derive(Clone)]
pub struct ProgressSyncer {
    inner: Arc<SyncerInner>,
}

struct SyncerInner {
    telemetry: SharedTelemetryHost,
    api: SharedApiClient,
    store: SharedStore,
    events: SharedEventSink,
    options: SyncOptions,
    state: Mutex<SyncerState>,
    /// Abort handle of the loop, reachable while a tick holds `state`
    loop_abort: StdMutex<Option<AbortHandle>>,
}

#[derive(Default)]
struct SyncerState {
    timer: Option<JoinHandle<()>>,
    /// Bumped on every cancellation; a tick stamped with an older value exits
    generation: u64,
    session: Option<PlaybackSession>,
    local_progress: Option<LocalMediaProgress>,
    last_sync_at: Option<Instant>,
    last_server_sync_at: Option<Instant>,
    /// Seconds listened that the server has not acknowledged yet
    unsynced_listening: u64,
    failed_syncs: u32,
    server_session_closed: bool,
    next_event_source: PlaybackEventSource,
    pending_manual_time: Option<(f64, Instant)>,
}

impl SyncerState {
    fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.id.as_str())
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }

    /// Cancel the loop and drop what was cached for the previous session
    fn clear_session_progress(&mut self) {
        self.cancel_timer();
        self.local_progress = None;
        self.last_sync_at = None;
        self.last_server_sync_at = None;
        self.unsynced_listening = 0;
        self.failed_syncs = 0;
        self.server_session_closed = false;
    }

    /// Forget everything about the current session
    fn reset(&mut self) {
        self.cancel_timer();
        *self = Self {
            generation: self.generation,
            ..Self::default()
        };
    }

    fn take_event_source(&mut self) -> PlaybackEventSource {
        std::mem::take(&mut self.next_event_source)
    }

    /// Manually set position, if one was set recently enough
    fn take_manual_time(&mut self) -> Option<f64> {
        let (seconds, expires_at) = self.pending_manual_time.take()?;
        (Instant::now() < expires_at && seconds.is_finite() && seconds >= 0.0).then_some(seconds)
    }
}

impl ProgressSyncer {
    pub fn new(
        telemetry: SharedTelemetryHost,
        api: SharedApiClient,
        store: SharedStore,
        events: SharedEventSink,
    ) -> Self {
        Self::with_options(telemetry, api, store, events, SyncOptions::default())
    }

    pub fn with_options(
        telemetry: SharedTelemetryHost,
        api: SharedApiClient,
        store: SharedStore,
        events: SharedEventSink,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SyncerInner {
                telemetry,
                api,
                store,
                events,
                options,
                state: Mutex::new(SyncerState::default()),
                loop_abort: StdMutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    /// Whether the periodic sync loop is active
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.is_running()
    }

    pub async fn current_session(&self) -> Option<PlaybackSession> {
        self.inner.state.lock().await.session.clone()
    }

    pub async fn current_session_id(&self) -> Option<String> {
        self.inner.state.lock().await.session_id().map(String::from)
    }

    /// Attribute the next play or pause event to `source`
    pub async fn mark_next_playback_event_source(&self, source: PlaybackEventSource) {
        self.inner.state.lock().await.next_event_source = source;
    }

    /// Remember a position the user picked while the player was not yet
    /// reporting it; the next play or seek event uses it instead
    pub async fn set_pending_manual_playback_time(&self, seconds: f64) {
        let expires_at = Instant::now() + self.inner.options.manual_time_ttl;
        self.inner.state.lock().await.pending_manual_time = Some((seconds, expires_at));
    }

    /// Stop pushing the current session to the server, e.g. after the server
    /// reported it closed through another channel
    pub async fn mark_current_session_closed(&self) {
        let mut state = self.inner.state.lock().await;
        if state.session.is_some() {
            info!("Marking current session closed on server");
            state.server_session_closed = true;
        }
    }

    /// Start the periodic sync loop for `session`
    ///
    /// A no-op when the loop already runs for the same session. Switching to
    /// another session cancels the old loop and forgets its cached state.
    pub async fn start(&self, session: &PlaybackSession) {
        let mut state = self.inner.state.lock().await;
        self.start_locked(&mut state, session);
    }

    /// Emit a play event and start syncing `session`
    pub async fn play(&self, session: &PlaybackSession) {
        let mut state = self.inner.state.lock().await;
        let mut session = session.clone();
        if let Some(seconds) = state.take_manual_time() {
            debug!("Using manually set position {} for play event", seconds);
            session.current_time = seconds;
        }

        let source = state.take_event_source();
        self.inner
            .emit_for(&session, PlaybackEventKind::Play, None, source);
        self.start_locked(&mut state, &session);
    }

    /// Stop the loop, run a final forced sync and emit a pause event
    ///
    /// When the loop was not running the sync is still attempted as a best
    /// effort. Server requests are bounded by the request timeout.
    pub async fn pause(&self) -> Option<SyncResult> {
        self.inner.abort_loop();
        let mut state = self.inner.state.lock().await;
        let was_running = state.is_running();
        if was_running {
            debug!("Pausing progress sync loop");
            state.cancel_timer();
        }

        let current_time = self.inner.telemetry.current_time_seconds();
        let result = if current_time > 0.0 && state.session.is_some() {
            self.inner
                .sync_locked(&mut state, true, current_time, true)
                .await
        } else {
            None
        };

        if was_running {
            state.last_sync_at = None;
            state.failed_syncs = 0;
        }
        if let (Some(seconds), Some(session)) = (state.take_manual_time(), state.session.as_mut())
        {
            session.current_time = seconds;
        }

        let source = state.take_event_source();
        self.inner
            .emit(&state, PlaybackEventKind::Pause, result.clone(), source);
        result
    }

    /// Stop the loop and close the session
    ///
    /// With `should_sync` the final position is synced first. All session
    /// state is cleared afterwards.
    pub async fn stop(&self, should_sync: bool) -> Option<SyncResult> {
        self.inner.abort_loop();
        let mut state = self.inner.state.lock().await;
        if state.is_running() {
            debug!("Stopping progress sync loop");
        }
        state.cancel_timer();

        let current_time = if should_sync {
            self.inner.telemetry.current_time_seconds()
        } else {
            0.0
        };
        let result = if current_time > 0.0 && state.session.is_some() {
            self.inner
                .sync_locked(&mut state, true, current_time, true)
                .await
        } else {
            None
        };

        let source = state.take_event_source();
        self.inner
            .emit(&state, PlaybackEventKind::Stop, result.clone(), source);
        state.reset();
        result
    }

    /// The session played to the end: sync at its total duration, emit a
    /// finished event and close the session
    pub async fn finished(&self) -> Option<SyncResult> {
        self.inner.abort_loop();
        let mut state = self.inner.state.lock().await;
        state.cancel_timer();

        let total_duration = state
            .session
            .as_ref()
            .map_or(0.0, PlaybackSession::total_duration);
        let result = if total_duration > 0.0 {
            state.last_sync_at.get_or_insert_with(Instant::now);
            self.inner
                .sync_locked(&mut state, true, total_duration, true)
                .await
        } else {
            None
        };

        let source = state.take_event_source();
        self.inner
            .emit(&state, PlaybackEventKind::Finished, result.clone(), source);
        state.reset();
        result
    }

    /// Record a seek in the history of the current session
    pub async fn seek(&self) {
        let mut state = self.inner.state.lock().await;
        let manual_time = state.take_manual_time();
        let current_time = self.inner.telemetry.current_time_seconds();

        let Some(session) = state.session.as_mut() else {
            debug!("Seek without a current session");
            return;
        };
        match manual_time {
            Some(seconds) => session.current_time = seconds,
            None if current_time >= 0.0 => session.current_time = current_time,
            None => {}
        }

        let source = state.take_event_source();
        self.inner
            .emit(&state, PlaybackEventKind::Seek, None, source);
    }

    /// Run one sync of the current session at `current_time` seconds
    ///
    /// Unforced syncs are dropped when they come too soon after the last one
    /// or when the position barely moved. Returns `None` when nothing was
    /// synced.
    pub async fn sync(
        &self,
        should_sync_server: bool,
        current_time: f64,
        force: bool,
    ) -> Option<SyncResult> {
        let mut state = self.inner.state.lock().await;
        self.inner
            .sync_locked(&mut state, should_sync_server, current_time, force)
            .await
    }

    /// Make `session` current and sync it immediately, outside the loop
    ///
    /// Emits `kind` when the sync produced a result, and always for terminal
    /// kinds.
    pub async fn sync_now(
        &self,
        kind: PlaybackEventKind,
        session: &PlaybackSession,
        should_sync_server: bool,
    ) -> Option<SyncResult> {
        let mut state = self.inner.state.lock().await;
        if state.session_id() != Some(session.id.as_str()) {
            if state.is_running() {
                info!("Playback session changed, stopping progress sync loop");
            }
            state.clear_session_progress();
        }
        state.session = Some(session.clone());
        state.local_progress = None;

        let now = Instant::now();
        if state.last_sync_at.is_none() {
            let backdate = self.inner.options.min_sync_gap * 2;
            state.last_sync_at = Some(now.checked_sub(backdate).unwrap_or(now));
        }

        let player_time = self.inner.telemetry.current_time_seconds();
        let current_time = if player_time > 0.0 {
            player_time
        } else {
            session.current_time
        };

        let result = self
            .inner
            .sync_locked(&mut state, should_sync_server, current_time, true)
            .await;
        if result.is_some() || kind.is_terminal() {
            let source = state.take_event_source();
            self.inner.emit(&state, kind, result.clone(), source);
        }
        result
    }

    /// Cancel the loop and forget the current session without syncing
    pub async fn reset(&self) {
        self.inner.abort_loop();
        self.inner.state.lock().await.reset();
    }

    fn start_locked(&self, state: &mut SyncerState, session: &PlaybackSession) {
        if state.session_id() == Some(session.id.as_str()) {
            if state.is_running() {
                debug!("Progress sync already running for session {}", session.id);
                return;
            }
        } else {
            if state.is_running() {
                info!("Playback session changed, resetting progress sync");
            }
            state.clear_session_progress();
        }

        let now = Instant::now();
        state.last_sync_at = Some(now);
        state.last_server_sync_at.get_or_insert(now);
        state.session = Some(session.clone());

        let timer = self.spawn_timer(state.generation);
        *self.inner.lock_loop_abort() = Some(timer.abort_handle());
        state.timer = Some(timer);
        debug!(
            "Started progress sync for session {} ({})",
            session.id,
            session.display_title_or_unset()
        );
    }

    fn spawn_timer(&self, generation: u64) -> JoinHandle<()> {
        // The loop must not keep the syncer alive
        let inner: Weak<SyncerInner> = Arc::downgrade(&self.inner);
        let period = self.inner.options.sync_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if !inner.on_tick(generation).await {
                    break;
                }
            }
        })
    }
}

impl SyncerInner {
    fn lock_loop_abort(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.loop_abort.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Abort the loop without waiting for `state`, so a tick blocked on the
    /// network gives up the lock right away
    fn abort_loop(&self) {
        if let Some(handle) = self.lock_loop_abort().take() {
            handle.abort();
        }
    }

    /// One iteration of the sync loop; returns false once the loop is stale
    async fn on_tick(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation || state.session.is_none() {
            return false;
        }
        if !self.telemetry.is_player_active() {
            return true;
        }

        if !self.telemetry.is_sleep_timer_active() {
            self.telemetry.check_auto_sleep_timer();
        }

        let should_sync_server = self.telemetry.is_unmetered_network()
            || state.last_server_sync_at.is_none_or(|at| {
                Instant::now().saturating_duration_since(at)
                    >= self.options.metered_server_sync_interval
            });

        let current_time = self.telemetry.current_time_seconds();
        if current_time <= 0.0 {
            return true;
        }

        let result = self
            .sync_locked(&mut state, should_sync_server, current_time, false)
            .await;
        if result.is_some() {
            self.emit(&state, PlaybackEventKind::Save, result, PlaybackEventSource::System);
        }
        true
    }

    async fn sync_locked(
        &self,
        state: &mut SyncerState,
        should_sync_server: bool,
        current_time: f64,
        force: bool,
    ) -> Option<SyncResult> {
        let Some(last_sync_at) = state.last_sync_at else {
            debug!("Sync skipped, no sync window open");
            return None;
        };
        let session = state.session.as_mut()?;

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(last_sync_at);
        if !force {
            if elapsed < self.options.min_sync_gap {
                debug!("Sync skipped, last sync was {:?} ago", elapsed);
                return None;
            }
            let advanced = current_time - session.current_time;
            if elapsed <= self.options.stall_window && advanced < self.options.min_position_advance
            {
                debug!("Sync skipped, position advanced only {:.2}s", advanced);
                return None;
            }
        }

        let listened = (elapsed.as_millis() / 1000).max(1) as u64;
        let linked = session
            .library_item_id
            .as_deref()
            .is_some_and(|id| !id.is_empty());
        let same_server = session.server_connection_config_id.is_some()
            && self.telemetry.connected_server_config_id() == session.server_connection_config_id;
        // Listening time only piles up for sessions the server can still take
        let pushable = if session.is_local() {
            linked && same_server
        } else {
            !state.server_session_closed
        };
        let data = SyncData {
            time_listened: state.unsynced_listening + listened,
            duration: session.total_duration(),
            current_time,
        };

        let mut updated = session.clone();
        updated.apply_sync_data(&data);
        if updated.progress().is_none() {
            error!(
                "Invalid progress for session {}: currentTime={} duration={}",
                updated.id, data.current_time, data.duration
            );
            return None;
        }
        // The payload carries the unacknowledged backlog, the session only
        // this interval
        updated.time_listening = session.time_listening + listened;
        *session = updated;
        if pushable {
            state.unsynced_listening += listened;
        }
        state.last_sync_at = Some(now);

        let session = state.session.clone()?;
        if let Err(e) = self.store.save_playback_session(&session) {
            error!("Failed to cache playback session {}: {}", session.id, e);
        }

        if session.is_local() {
            self.save_local_progress(state, &session);

            if !(pushable && should_sync_server)
                || !self.telemetry.has_network_connection()
            {
                return Some(SyncResult::not_attempted());
            }

            let outcome = self
                .request(self.api.send_local_progress_sync(&session))
                .await;
            state.last_server_sync_at = Some(Instant::now());
            return Some(self.record_outcome(state, &session, outcome));
        }

        if state.server_session_closed {
            debug!(
                "Server session {} is closed, progress saved locally only",
                session.id
            );
            return Some(SyncResult::server_session_closed());
        }

        if !should_sync_server || !self.telemetry.has_network_connection() {
            return Some(SyncResult::not_attempted());
        }

        let outcome = self
            .request(self.api.send_progress_sync(&session.id, &data))
            .await;
        state.last_server_sync_at = Some(Instant::now());
        match outcome {
            Err(e) if e.is_not_found() => {
                warn!(
                    "Server no longer knows session {}, keeping progress local",
                    session.id
                );
                state.server_session_closed = true;
                state.unsynced_listening = 0;
                Some(SyncResult::attempted(false, Some(e.to_string())))
            }
            outcome => Some(self.record_outcome(state, &session, outcome)),
        }
    }

    fn save_local_progress(&self, state: &mut SyncerState, session: &PlaybackSession) {
        let progress = match state.local_progress.take() {
            Some(mut progress) => {
                progress.update_from_playback_session(session);
                progress
            }
            None => match self
                .store
                .local_media_progress(&session.local_media_progress_id())
            {
                Ok(Some(mut progress)) => {
                    progress.update_from_playback_session(session);
                    progress
                }
                Ok(None) => session.new_local_media_progress(),
                Err(e) => {
                    warn!("Failed to read local media progress: {}", e);
                    session.new_local_media_progress()
                }
            },
        };

        if progress.progress.is_nan() {
            error!("Invalid local media progress for {}", progress.id);
        } else if let Err(e) = self.store.save_local_media_progress(&progress) {
            error!("Failed to save local media progress {}: {}", progress.id, e);
        } else {
            debug!(
                "Saved local progress {} at {}% ({}s)",
                progress.id,
                progress.progress_percent(),
                progress.current_time
            );
            self.telemetry.notify_local_progress_update(&progress);
        }
        state.local_progress = Some(progress);
    }

    async fn request(
        &self,
        request: impl Future<Output = Result<(), ApiError>>,
    ) -> Result<(), ApiError> {
        let limit = self.options.request_timeout;
        time::timeout(limit, request)
            .await
            .unwrap_or(Err(ApiError::TimedOut(limit)))
    }

    fn record_outcome(
        &self,
        state: &mut SyncerState,
        session: &PlaybackSession,
        outcome: Result<(), ApiError>,
    ) -> SyncResult {
        match outcome {
            Ok(()) => {
                state.failed_syncs = 0;
                state.unsynced_listening = 0;
                self.telemetry.alert_sync_success();
                if let Err(e) = self.store.remove_playback_session(&session.id) {
                    warn!("Failed to drop cached session {}: {}", session.id, e);
                }
                SyncResult::attempted(true, None)
            }
            Err(e) => {
                warn!("Progress sync for session {} failed: {}", session.id, e);
                state.failed_syncs += 1;
                if state.failed_syncs >= self.options.failures_before_alert {
                    self.telemetry.alert_sync_failing();
                    state.failed_syncs = 0;
                }
                SyncResult::attempted(false, Some(e.to_string()))
            }
        }
    }

    fn emit(
        &self,
        state: &SyncerState,
        kind: PlaybackEventKind,
        sync_result: Option<SyncResult>,
        source: PlaybackEventSource,
    ) {
        if let Some(session) = &state.session {
            self.emit_for(session, kind, sync_result, source);
        }
    }

    fn emit_for(
        &self,
        session: &PlaybackSession,
        kind: PlaybackEventKind,
        sync_result: Option<SyncResult>,
        source: PlaybackEventSource,
    ) {
        self.events.on_playback_event(&PlaybackEvent {
            kind,
            session: session.clone(),
            sync_result,
            source,
        });
    }
}

impl Drop for SyncerInner {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}
