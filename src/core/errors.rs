//! Error types for the conversation engine

use thiserror::Error;

use crate::remote::RemoteError;

/// Failures surfaced by a session controller.
///
/// Every variant is terminal for the submission that produced it and renders
/// as a short inline message. Persistence failures in the stores are not
/// represented here: those are recovered internally and at most logged.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Nothing to send: the text was empty after trimming and no attachments
    /// were provided. Checked locally, never reaches the network.
    #[error("message text is empty and no attachments were provided")]
    EmptySubmission,

    /// A request is already in flight on this controller.
    #[error("a request is already in flight for this conversation")]
    Busy,

    /// The caller canceled the request before it completed. Expected,
    /// not a failure: the transcript was rolled back to its pre-submit
    /// state.
    #[error("request canceled")]
    Canceled,

    /// The remote service failed or returned an unusable response. The
    /// staged user turn stays in the transcript for a manual retry.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SessionError {
    /// True for the user-initiated cancel outcome, which callers typically
    /// render differently from real failures.
    pub fn is_canceled(&self) -> bool {
        matches!(self, SessionError::Canceled)
    }
}
