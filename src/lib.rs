pub mod error;
pub mod events;
pub mod http;
pub mod session;
pub mod settings;
pub mod sleep;
pub mod store;
pub mod sync;
pub mod telemetry;

// Re-export main types for convenience
pub use error::{ApiError, ReplayError, SettingsError, StoreError};
pub use events::{
    EventManager, EventSink, HistoryListener, MediaItemEvent, MediaItemEventType,
    MediaItemHistory, NoopSink, PlaybackEvent, PlaybackEventKind, PlaybackEventSource,
    SharedEventSink, SharedHistoryListener,
};
pub use http::{ApiClient, DeviceInfo, LocalSessionSyncResult, ReqwestApiClient, SharedApiClient};
pub use session::{
    AudioTrack, Chapter, FINISHED_PROGRESS_THRESHOLD, LocalMediaProgress, Media, PlayMethod,
    PlaybackSession,
};
pub use settings::{DeviceSettings, parse_time_of_day};
pub use sleep::{
    SharedSleepTimerHost, SleepTimerHost, SleepTimerManager, SleepTimerMode, SleepTimerOptions,
    fade_volume, is_within_auto_window,
};
pub use store::{JsonStore, LocalStore, MemoryStore, SharedStore, remove_orphaned_progress};
pub use sync::{
    ProgressSyncer, ReplaySummary, SERVER_SESSION_CLOSED, SyncData, SyncOptions, SyncResult,
    replay_offline_sessions,
};
pub use telemetry::{SharedTelemetryHost, TelemetryHost};
