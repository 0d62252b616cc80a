// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tracing::{debug, info, warn};

use crate::error::ReplayError;
use crate::events::{EventSink, PlaybackEvent, PlaybackEventKind, PlaybackEventSource};
use crate::http::ApiClient;
use crate::store::LocalStore;

use super::SyncResult;

/// Outcome of replaying cached sessions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Sessions sent to the server
    pub uploaded: usize,
    /// Sessions the server accepted; they were removed from the cache
    pub accepted: usize,
    /// Accepted sessions that moved the server's stored progress
    pub progress_synced: usize,
    /// Rejected sessions (id, error message); they stay cached
    pub rejected: Vec<(String, String)>,
}

/// Upload every cached session of `server_config_id` in one batch
///
/// Sessions are cached by the progress syncer until a server sync succeeds,
/// so whatever is left here never reached the server.
pub async fn replay_offline_sessions(
    api: &dyn ApiClient,
    store: &dyn LocalStore,
    events: &dyn EventSink,
    server_config_id: &str,
) -> Result<ReplaySummary, ReplayError> {
    let sessions: Vec<_> = store
        .playback_sessions()?
        .into_iter()
        .filter(|session| session.server_connection_config_id.as_deref() == Some(server_config_id))
        .collect();

    if sessions.is_empty() {
        debug!("No cached sessions to replay for server {}", server_config_id);
        return Ok(ReplaySummary::default());
    }

    info!(
        "Replaying {} cached sessions to server {}",
        sessions.len(),
        server_config_id
    );
    let results = api.send_local_sessions(&sessions).await?;

    let mut summary = ReplaySummary {
        uploaded: sessions.len(),
        ..ReplaySummary::default()
    };
    for result in results {
        if !result.success {
            let message = result.error.unwrap_or_else(|| "Unknown error".to_string());
            warn!("Server rejected cached session {}: {}", result.id, message);
            summary.rejected.push((result.id, message));
            continue;
        }

        summary.accepted += 1;
        if let Err(e) = store.remove_playback_session(&result.id) {
            warn!("Failed to drop replayed session {}: {}", result.id, e);
        }

        if result.progress_synced == Some(true) {
            summary.progress_synced += 1;
            if let Some(session) = sessions.iter().find(|s| s.id == result.id) {
                events.on_playback_event(&PlaybackEvent {
                    kind: PlaybackEventKind::Save,
                    session: session.clone(),
                    sync_result: Some(SyncResult::attempted(
                        true,
                        Some("Progress synced on server".to_string()),
                    )),
                    source: PlaybackEventSource::System,
                });
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::http::LocalSessionSyncResult;
    use crate::session::PlaybackSession;
    use crate::session::playback::tests::make_book_session;
    use crate::store::MemoryStore;
    use crate::sync::SyncData;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct BatchApi {
        uploaded: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ApiClient for BatchApi {
        async fn send_progress_sync(
            &self,
            _session_id: &str,
            _payload: &SyncData,
        ) -> Result<(), ApiError> {
            Ok(())
        }

        async fn send_local_progress_sync(
            &self,
            _session: &PlaybackSession,
        ) -> Result<(), ApiError> {
            Ok(())
        }

        async fn send_local_sessions(
            &self,
            sessions: &[PlaybackSession],
        ) -> Result<Vec<LocalSessionSyncResult>, ApiError> {
            if self.fail {
                return Err(ApiError::HttpStatus {
                    url: "https://abs.example.com/api/session/local-all".to_string(),
                    status: 503,
                });
            }
            *self.uploaded.lock().unwrap() = sessions.iter().map(|s| s.id.clone()).collect();
            Ok(sessions
                .iter()
                .map(|s| LocalSessionSyncResult {
                    id: s.id.clone(),
                    success: s.id != "rejected",
                    progress_synced: Some(s.id == "synced"),
                    error: (s.id == "rejected").then(|| "Item not found".to_string()),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct Saves(Mutex<Vec<String>>);

    impl EventSink for Saves {
        fn on_playback_event(&self, event: &PlaybackEvent) {
            assert_eq!(event.kind, PlaybackEventKind::Save);
            self.0.lock().unwrap().push(event.session.id.clone());
        }
    }

    fn cache(store: &MemoryStore, ids: &[&str], server: &str) {
        for id in ids {
            let mut session = make_book_session(id, 100.0);
            session.server_connection_config_id = Some(server.to_string());
            store.save_playback_session(&session).unwrap();
        }
    }

    #[tokio::test]
    async fn replays_sessions_of_connected_server() {
        let store = MemoryStore::new();
        cache(&store, &["synced", "stale", "rejected"], "server-1");
        cache(&store, &["elsewhere"], "server-2");
        let api = BatchApi::default();
        let saves = Saves::default();

        let summary = replay_offline_sessions(&api, &store, &saves, "server-1")
            .await
            .unwrap();

        assert_eq!(summary.uploaded, 3);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.progress_synced, 1);
        assert_eq!(
            summary.rejected,
            vec![("rejected".to_string(), "Item not found".to_string())]
        );
        assert!(!api.uploaded.lock().unwrap().contains(&"elsewhere".to_string()));
        assert_eq!(*saves.0.lock().unwrap(), vec!["synced".to_string()]);

        let mut left: Vec<_> = store
            .playback_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        left.sort();
        assert_eq!(left, vec!["elsewhere".to_string(), "rejected".to_string()]);
    }

    #[tokio::test]
    async fn nothing_cached_skips_request() {
        let store = MemoryStore::new();
        let api = BatchApi {
            fail: true,
            ..BatchApi::default()
        };

        let summary = replay_offline_sessions(&api, &store, &Saves::default(), "server-1")
            .await
            .unwrap();
        assert_eq!(summary, ReplaySummary::default());
    }

    #[tokio::test]
    async fn upload_failure_keeps_cache() {
        let store = MemoryStore::new();
        cache(&store, &["s1"], "server-1");
        let api = BatchApi {
            fail: true,
            ..BatchApi::default()
        };

        let result = replay_offline_sessions(&api, &store, &Saves::default(), "server-1").await;
        assert!(matches!(result, Err(ReplayError::Api(_))));
        assert_eq!(store.playback_sessions().unwrap().len(), 1);
    }
}
