//! colloquy: client-side conversation engine for AI text-transformation services
//!
//! This library provides:
//! - Session controllers with optimistic staging, cancellation, and exact rollback
//! - Bounded per-feature conversation history with pluggable persistence
//! - A multipart HTTP binding for the transformation endpoints
//! - Theme state shared across features
//! - An event stream for front-ends to observe session and store changes

pub mod config;
pub mod core;
pub mod remote;
pub mod storage;
pub mod workspace;

pub use crate::config::Config;
pub use crate::core::{
    Attachment, EventReceiver, EventSender, FeatureId, HistoryStore, Role, SessionController,
    SessionError, SessionEvent, SessionRecord, SubmitOptions, Theme, ThemeStore, Turn,
    DEFAULT_STILL_WAITING, MAX_SESSIONS_PER_FEATURE,
};
pub use crate::remote::{HttpTransformService, RemoteError, TransformRequest, TransformService};
pub use crate::storage::{FileStateStore, MemoryStateStore, StateStore};
pub use crate::workspace::Workspace;
