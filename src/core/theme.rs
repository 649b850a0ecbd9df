//! Theme preference

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{StateStore, THEME_KEY};

use super::events::{EventSender, SessionEvent};

/// UI color scheme preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    /// The other theme.
    pub fn toggled(&self) -> Theme {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Stable identifier used as the persisted value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            _ => Err(format!("Unknown theme: {}", s)),
        }
    }
}

/// Persisted light/dark preference.
///
/// Hydrates once at construction; an absent, unreadable, or unrecognized
/// stored value falls back to the light default. Every change re-persists
/// and notifies; persistence failures are logged and swallowed.
pub struct ThemeStore {
    current: Mutex<Theme>,
    store: Arc<dyn StateStore>,
    events: EventSender,
}

impl ThemeStore {
    pub fn hydrate(store: Arc<dyn StateStore>, events: EventSender) -> Self {
        let current = match store.load(THEME_KEY) {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or_else(|err| {
                warn!("ignoring stored theme: {err}");
                Theme::default()
            }),
            Ok(None) => Theme::default(),
            Err(err) => {
                warn!("failed to read stored theme: {err:#}");
                Theme::default()
            }
        };
        Self {
            current: Mutex::new(current),
            store,
            events,
        }
    }

    /// The active theme.
    pub fn current(&self) -> Theme {
        *self.current.lock().unwrap()
    }

    /// Switch to `theme`. Setting the already-active theme is a no-op.
    pub fn set(&self, theme: Theme) {
        {
            let mut current = self.current.lock().unwrap();
            if *current == theme {
                return;
            }
            *current = theme;
        }
        if let Err(err) = self.store.save(THEME_KEY, theme.as_str()) {
            warn!("failed to persist theme: {err:#}");
        }
        let _ = self.events.send(SessionEvent::ThemeChanged(theme));
    }

    /// Flip between light and dark, returning the new theme.
    pub fn toggle(&self) -> Theme {
        let next = self.current().toggled();
        self.set(next);
        next
    }
}
