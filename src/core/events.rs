//! Engine events
//!
//! Notifications pushed from the controllers and stores to the presentation
//! layer over an unbounded channel. State mutation and change notification
//! are separate steps: every event is emitted after the corresponding state
//! is already observable through the read accessors, so a consumer reacting
//! to an event always sees the new state.
//!
//! Send failures are ignored throughout; a departed consumer must not break
//! the engine.

use std::time::Duration;

use tokio::sync::mpsc;

use super::theme::Theme;
use super::types::FeatureId;

/// Sender half held by controllers and stores.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiver half handed to the presentation layer.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the event channel pair.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted by the conversation engine.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    // ========== Submission lifecycle ==========
    /// A submission passed validation and its outbound call was opened.
    SubmitStarted { feature: FeatureId },

    /// The outbound call has been pending past the soft-warning threshold.
    /// Emitted at most once per submission; the engine never cancels the
    /// call on its own.
    StillWaiting { feature: FeatureId, elapsed: Duration },

    /// The assistant turn was appended and the exchange recorded.
    SubmitCompleted { feature: FeatureId, turns: usize },

    /// The submission was canceled and the transcript rolled back.
    SubmitCanceled { feature: FeatureId },

    /// The submission failed; the user turn stays in the transcript.
    SubmitFailed { feature: FeatureId, message: String },

    // ========== Store changes ==========
    /// The live transcript was wholesale replaced (a stored session was
    /// resumed or the surface was reset).
    TranscriptReplaced { feature: FeatureId, turns: usize },

    /// A feature's stored session list changed; `sessions` is its new
    /// length.
    HistoryChanged { feature: FeatureId, sessions: usize },

    /// The theme preference changed.
    ThemeChanged(Theme),
}
