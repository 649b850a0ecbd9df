//! Remote transformation services
//!
//! Every feature surface talks to one endpoint of the backing AI service
//! through the [`TransformService`] trait, the seam between the session
//! controller and the network. The HTTP implementation lives in
//! [`http::HttpTransformService`]; tests substitute deterministic fakes.

mod error;
mod http;

pub use error::RemoteError;
pub use http::HttpTransformService;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::types::{Attachment, Turn};

/// One outbound submission: the new input plus the prior transcript for
/// context. Serializes to the JSON descriptor the service parses; the
/// attachments ride along out-of-band as binary multipart parts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformRequest {
    pub text: String,
    pub history: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
    #[serde(skip)]
    pub attachments: Vec<Attachment>,
}

/// A remote text-transformation endpoint.
#[async_trait]
pub trait TransformService: Send + Sync {
    /// Service name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Perform one transformation, returning the assistant text.
    ///
    /// `cancel` is cooperative: implementations should observe it and return
    /// [`RemoteError::Canceled`] promptly. Callers do not depend on it (a
    /// caller that loses interest drops the future), but honoring the token
    /// releases connections sooner.
    async fn transform(
        &self,
        request: TransformRequest,
        cancel: CancellationToken,
    ) -> Result<String, RemoteError>;
}
