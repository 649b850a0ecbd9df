//! Remote service errors

use thiserror::Error;

/// Failures from the transformation service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Non-2xx HTTP status, with the detail parsed from the body when the
    /// service supplied one.
    #[error("service error ({status}): {detail}")]
    Status { status: u16, detail: String },

    /// 2xx response that declared failure (`success: false`).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Connection, timeout, or other transport failure.
    #[error("network error: {0}")]
    Transport(String),

    /// A body could not be encoded or interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The call observed its cancellation token.
    #[error("request canceled before completion")]
    Canceled,
}

impl RemoteError {
    /// Build a status error from an HTTP status code and raw body, pulling a
    /// human-readable detail out of the body when it is a JSON object with a
    /// `detail` or `error` key.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = extract_detail(body).unwrap_or_else(|| {
            format!("the service returned an unexpected error (HTTP {status})")
        });
        RemoteError::Status { status, detail }
    }

    /// Map a transport-level failure onto [`RemoteError::Transport`].
    pub fn from_network(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Transport("request timed out".to_string())
        } else if err.is_connect() {
            RemoteError::Transport(format!("could not reach the service: {err}"))
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// Pull the `detail` (or `error`) string out of a JSON error body.
pub(crate) fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "error"].iter().find_map(|key| {
        value
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    })
}
