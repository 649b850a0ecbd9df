//! Stored conversation history
//!
//! Durable, per-feature bounded recency lists of past sessions. The
//! in-memory mapping is the single source of truth; persistence is a side
//! effect of every mutation, serialized as one JSON blob under one key.
//! Persistence failures are logged and swallowed: losing durability must
//! never interrupt a conversation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::storage::{StateStore, HISTORY_KEY};

use super::events::{EventSender, SessionEvent};
use super::types::{FeatureId, SessionRecord, Turn};

/// Most-recent records retained per feature.
pub const MAX_SESSIONS_PER_FEATURE: usize = 20;

type HistoryMap = HashMap<FeatureId, Vec<SessionRecord>>;

/// Per-feature recency lists of [`SessionRecord`]s, newest first.
pub struct HistoryStore {
    state: Mutex<HistoryMap>,
    store: Arc<dyn StateStore>,
    events: EventSender,
}

impl HistoryStore {
    /// Load the persisted mapping, starting empty when it is absent or
    /// unreadable.
    pub fn hydrate(store: Arc<dyn StateStore>, events: EventSender) -> Self {
        let state = match store.load(HISTORY_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<HistoryMap>(&raw) {
                Ok(map) => map,
                Err(err) => {
                    warn!("discarding unreadable conversation history: {err}");
                    HistoryMap::new()
                }
            },
            Ok(None) => HistoryMap::new(),
            Err(err) => {
                warn!("failed to read conversation history: {err:#}");
                HistoryMap::new()
            }
        };
        Self {
            state: Mutex::new(state),
            store,
            events,
        }
    }

    /// Record a completed exchange for `feature`, newest first, evicting
    /// past the retention cap. Transcripts without a user turn are never
    /// recorded. Returns the stored record.
    pub fn add_session(&self, feature: FeatureId, transcript: &[Turn]) -> Option<SessionRecord> {
        let record = SessionRecord::from_transcript(feature, transcript)?;
        let sessions = {
            let mut state = self.state.lock().unwrap();
            let list = state.entry(feature).or_default();
            list.insert(0, record.clone());
            list.truncate(MAX_SESSIONS_PER_FEATURE);
            let sessions = list.len();
            self.persist(&state);
            sessions
        };
        let _ = self
            .events
            .send(SessionEvent::HistoryChanged { feature, sessions });
        Some(record)
    }

    /// Remove one stored session. Unknown ids are a no-op; returns whether a
    /// record was removed.
    pub fn delete_session(&self, feature: FeatureId, id: &str) -> bool {
        let sessions = {
            let mut state = self.state.lock().unwrap();
            let list = match state.get_mut(&feature) {
                Some(list) => list,
                None => return false,
            };
            let before = list.len();
            list.retain(|record| record.id != id);
            if list.len() == before {
                return false;
            }
            let sessions = list.len();
            self.persist(&state);
            sessions
        };
        let _ = self
            .events
            .send(SessionEvent::HistoryChanged { feature, sessions });
        true
    }

    /// Drop every stored session for `feature`.
    pub fn clear_feature(&self, feature: FeatureId) {
        {
            let mut state = self.state.lock().unwrap();
            state.remove(&feature);
            self.persist(&state);
        }
        let _ = self
            .events
            .send(SessionEvent::HistoryChanged { feature, sessions: 0 });
    }

    /// Stored sessions for `feature`, newest first.
    pub fn sessions(&self, feature: FeatureId) -> Vec<SessionRecord> {
        self.state
            .lock()
            .unwrap()
            .get(&feature)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up one stored session. The returned record is a deep copy:
    /// mutating it, or a live transcript resumed from it, leaves the stored
    /// record untouched.
    pub fn find_session(&self, feature: FeatureId, id: &str) -> Option<SessionRecord> {
        self.state
            .lock()
            .unwrap()
            .get(&feature)
            .and_then(|list| list.iter().find(|record| record.id == id).cloned())
    }

    /// Serialize the whole mapping under the history key. Called with the
    /// state lock held so concurrent mutations cannot interleave a stale
    /// snapshot into the persisted blob.
    fn persist(&self, state: &HistoryMap) {
        let raw = match serde_json::to_string_pretty(state) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to serialize conversation history: {err}");
                return;
            }
        };
        if let Err(err) = self.store.save(HISTORY_KEY, &raw) {
            warn!("failed to persist conversation history: {err:#}");
        }
    }
}
