mod replay;
mod syncer;
mod types;

pub use replay::{ReplaySummary, replay_offline_sessions};
pub use syncer::ProgressSyncer;
pub use types::{SERVER_SESSION_CLOSED, SyncData, SyncOptions, SyncResult};
