//! Top-level assembly: one controller per feature over shared stores.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::core::events::{self, EventReceiver};
use crate::core::{FeatureId, HistoryStore, SessionController, Theme, ThemeStore};
use crate::remote::HttpTransformService;
use crate::storage::{FileStateStore, StateStore};

/// Everything a front-end needs: the per-feature session controllers, the
/// shared history store, and the theme store, all publishing to a single
/// event stream.
pub struct Workspace {
    history: Arc<HistoryStore>,
    theme: ThemeStore,
    controllers: HashMap<FeatureId, Arc<SessionController>>,
}

impl Workspace {
    /// Build a workspace persisting to the configured state directory (or
    /// the platform default).
    pub fn new(config: &Config) -> Result<(Self, EventReceiver)> {
        let store: Arc<dyn StateStore> = match &config.storage.state_dir {
            Some(dir) => Arc::new(FileStateStore::new(dir)?),
            None => Arc::new(FileStateStore::open_default()?),
        };
        Ok(Self::with_state_store(config, store))
    }

    /// Build a workspace over an explicit state store.
    pub fn with_state_store(config: &Config, store: Arc<dyn StateStore>) -> (Self, EventReceiver) {
        let (tx, rx) = events::channel();
        let history = Arc::new(HistoryStore::hydrate(store.clone(), tx.clone()));
        let theme = ThemeStore::hydrate(store, tx.clone());

        let client = reqwest::Client::new();
        let mut controllers = HashMap::new();
        for feature in FeatureId::ALL {
            let service = Arc::new(HttpTransformService::new(
                client.clone(),
                &config.remote.base_url,
                feature,
            ));
            let controller =
                SessionController::new(feature, service, history.clone(), tx.clone())
                    .with_still_waiting_after(config.still_waiting_after());
            controllers.insert(feature, Arc::new(controller));
        }

        (
            Self {
                history,
                theme,
                controllers,
            },
            rx,
        )
    }

    /// The controller bound to `feature`. Every feature has one.
    pub fn controller(&self, feature: FeatureId) -> Arc<SessionController> {
        Arc::clone(&self.controllers[&feature])
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn theme(&self) -> &ThemeStore {
        &self.theme
    }

    /// Resume a stored session into the feature's live transcript. Returns
    /// false when no session with `id` exists for `feature`.
    pub fn resume(&self, feature: FeatureId, id: &str) -> bool {
        match self.history.find_session(feature, id) {
            Some(record) => {
                self.controller(feature).load_transcript(&record.transcript);
                true
            }
            None => false,
        }
    }

    /// Convenience for front-ends: flip the theme and return the new value.
    pub fn toggle_theme(&self) -> Theme {
        self.theme.toggle()
    }
}
