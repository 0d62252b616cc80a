// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::session::{LocalMediaProgress, PlaybackSession};
use crate::store::SharedStore;

use super::{
    EventSink, MediaItemEvent, MediaItemEventType, MediaItemHistory, PlaybackEvent,
    SharedEventSink,
};

/// Notified whenever an item's history log changes
pub trait HistoryListener: Send + Sync {
    fn on_media_item_history_updated(&self, history: &MediaItemHistory);
}

/// A shared reference to a history listener
pub type SharedHistoryListener = Arc<dyn HistoryListener>;

/// Fans playback lifecycle events out into the persisted per-item history
/// and to any registered client sinks
pub struct EventManager {
    store: SharedStore,
    sinks: Vec<SharedEventSink>,
    history_listener: Option<SharedHistoryListener>,
}

impl EventManager {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            sinks: Vec::new(),
            history_listener: None,
        }
    }

    /// Forward every event to `sink` after it was recorded
    pub fn with_sink(mut self, sink: SharedEventSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_history_listener(mut self, listener: SharedHistoryListener) -> Self {
        self.history_listener = Some(listener);
        self
    }

    /// Wrap the manager for use as the syncer's event sink
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// History key of the item a session plays
    ///
    /// Server items are keyed by media item id, local-only items by their
    /// local progress id.
    pub fn history_id(session: &PlaybackSession) -> String {
        session
            .media_item_id()
            .unwrap_or_else(|| session.local_media_progress_id())
    }

    pub fn history(&self, id: &str) -> Option<MediaItemHistory> {
        match self.store.media_item_history(id) {
            Ok(history) => history,
            Err(e) => {
                warn!("Failed to read media item history {}: {}", id, e);
                None
            }
        }
    }

    /// Record that progress for an item was reconciled outside of playback
    ///
    /// Only items that already have a history get the event.
    pub fn sync_event(&self, progress: &LocalMediaProgress, description: &str) {
        let media_item_id = progress.media_item_id();
        info!(
            "Sync Event for media item id \"{}\", currentTime={}",
            media_item_id, progress.current_time
        );

        let Some(mut history) = self.history(&media_item_id) else {
            warn!(
                "Media item history not created yet for media item id {}",
                media_item_id
            );
            return;
        };

        history.events.push(MediaItemEvent {
            name: "Sync".to_string(),
            event_type: MediaItemEventType::Sync,
            description: description.to_string(),
            current_time: progress.current_time,
            server_sync_attempted: false,
            server_sync_success: None,
            server_sync_message: None,
            timestamp: Utc::now(),
        });
        self.save(&history);
    }

    fn add_playback_event(&self, event: &PlaybackEvent) {
        let id = Self::history_id(&event.session);
        let mut history = self.history(&id).unwrap_or_else(|| {
            info!(
                "Creating new media item history for media \"{}\"",
                event.session.display_title_or_unset()
            );
            MediaItemHistory::for_session(id, &event.session)
        });

        let sync_result = event.sync_result.as_ref();
        history.events.push(MediaItemEvent {
            name: event.kind.as_str().to_string(),
            event_type: MediaItemEventType::Playback,
            description: String::new(),
            current_time: event.session.current_time,
            server_sync_attempted: sync_result.is_some_and(|r| r.server_sync_attempted),
            server_sync_success: sync_result.and_then(|r| r.server_sync_success),
            server_sync_message: sync_result.and_then(|r| r.server_sync_message.clone()),
            timestamp: Utc::now(),
        });
        self.save(&history);
    }

    fn save(&self, history: &MediaItemHistory) {
        if let Err(e) = self.store.save_media_item_history(history) {
            error!("Failed to save media item history {}: {}", history.id, e);
            return;
        }
        if let Some(listener) = &self.history_listener {
            listener.on_media_item_history_updated(history);
        }
    }
}

impl EventSink for EventManager {
    fn on_playback_event(&self, event: &PlaybackEvent) {
        info!(
            "{} Event for media \"{}\", currentTime={}",
            event.kind,
            event.session.display_title_or_unset(),
            event.session.current_time
        );

        self.add_playback_event(event);

        for sink in &self.sinks {
            sink.on_playback_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PlaybackEventKind, PlaybackEventSource};
    use crate::session::playback::tests::{make_book_session, make_local_session};
    use crate::store::{LocalStore, MemoryStore};
    use crate::sync::SyncResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        kinds: Mutex<Vec<PlaybackEventKind>>,
    }

    impl EventSink for RecordingSink {
        fn on_playback_event(&self, event: &PlaybackEvent) {
            self.kinds.lock().unwrap().push(event.kind);
        }
    }

    #[derive(Default)]
    struct CountingListener {
        updates: Mutex<usize>,
    }

    impl HistoryListener for CountingListener {
        fn on_media_item_history_updated(&self, _history: &MediaItemHistory) {
            *self.updates.lock().unwrap() += 1;
        }
    }

    fn event(kind: PlaybackEventKind, session: PlaybackSession) -> PlaybackEvent {
        PlaybackEvent {
            kind,
            session,
            sync_result: None,
            source: PlaybackEventSource::System,
        }
    }

    #[test]
    fn records_events_into_history_and_forwards() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let listener = Arc::new(CountingListener::default());
        let manager = EventManager::new(store.clone())
            .with_sink(sink.clone())
            .with_history_listener(listener.clone());

        let mut session = make_book_session("s1", 100.0);
        manager.on_playback_event(&event(PlaybackEventKind::Play, session.clone()));

        session.current_time = 15.0;
        let mut save = event(PlaybackEventKind::Save, session);
        save.sync_result = Some(SyncResult::attempted(false, Some("HTTP error 500".to_string())));
        manager.on_playback_event(&save);

        let history = store.media_item_history("li-book").unwrap().unwrap();
        assert_eq!(history.events.len(), 2);
        assert_eq!(history.events[0].name, "Play");
        assert!(!history.events[0].server_sync_attempted);

        let last = history.last_event().unwrap();
        assert_eq!(last.name, "Save");
        assert_eq!(last.current_time, 15.0);
        assert!(last.server_sync_attempted);
        assert_eq!(last.server_sync_success, Some(false));

        assert_eq!(
            *sink.kinds.lock().unwrap(),
            vec![PlaybackEventKind::Play, PlaybackEventKind::Save]
        );
        assert_eq!(*listener.updates.lock().unwrap(), 2);
    }

    #[test]
    fn local_only_items_are_keyed_by_local_id() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let manager = EventManager::new(store.clone());

        let mut session = make_local_session("s1", 100.0);
        session.library_item_id = None;
        manager.on_playback_event(&event(PlaybackEventKind::Pause, session));

        let history = store.media_item_history("local-1").unwrap().unwrap();
        assert!(history.is_local);
        assert_eq!(history.events.len(), 1);
    }

    #[test]
    fn sync_event_requires_existing_history() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let manager = EventManager::new(store.clone());
        let session = make_local_session("s1", 100.0);
        let progress = session.new_local_media_progress();

        manager.sync_event(&progress, "Local progress was behind server");
        assert!(store.media_item_history("li-book").unwrap().is_none());

        manager.on_playback_event(&event(PlaybackEventKind::Play, session));
        manager.sync_event(&progress, "Local progress was behind server");

        let history = manager.history("li-book").unwrap();
        let last = history.last_event().unwrap();
        assert_eq!(last.event_type, MediaItemEventType::Sync);
        assert_eq!(last.description, "Local progress was behind server");
    }
}
