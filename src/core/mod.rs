//! Core conversation engine: session control, history, theme, and the
//! event stream that front-ends subscribe to.

pub mod controller;
pub mod errors;
pub mod events;
pub mod history;
pub mod theme;
pub mod types;

pub use controller::{SessionController, SubmitOptions, DEFAULT_STILL_WAITING};
pub use errors::SessionError;
pub use events::{EventReceiver, EventSender, SessionEvent};
pub use history::{HistoryStore, MAX_SESSIONS_PER_FEATURE};
pub use theme::{Theme, ThemeStore};
pub use types::{Attachment, FeatureId, Role, SessionRecord, Turn};
