//! HTTP implementation of the transformation service
//!
//! Wire contract: POST a multipart form with a `request` part holding the
//! JSON descriptor and zero or more `files` parts carrying attachment bytes.
//! Success bodies are JSON objects with a per-feature response field; error
//! bodies carry a `detail` (or `error`) message.

use async_trait::async_trait;
use reqwest::multipart;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::types::FeatureId;

use super::error::extract_detail;
use super::{RemoteError, TransformRequest, TransformService};

/// reqwest-backed [`TransformService`] bound to one feature endpoint.
pub struct HttpTransformService {
    client: reqwest::Client,
    feature: FeatureId,
    url: String,
}

impl HttpTransformService {
    pub fn new(client: reqwest::Client, base_url: &str, feature: FeatureId) -> Self {
        let url = format!("{}{}", base_url.trim_end_matches('/'), feature.endpoint_path());
        Self {
            client,
            feature,
            url,
        }
    }

    /// Endpoint URL this service posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_form(&self, request: &TransformRequest) -> Result<multipart::Form, RemoteError> {
        let descriptor = serde_json::to_string(request)
            .map_err(|err| RemoteError::Malformed(format!("could not encode request: {err}")))?;
        let mut form = multipart::Form::new().text("request", descriptor);
        for attachment in &request.attachments {
            let part = multipart::Part::bytes(attachment.content.clone())
                .file_name(attachment.filename.clone())
                .mime_str(&attachment.mime_type)
                .map_err(|err| {
                    RemoteError::Malformed(format!(
                        "invalid attachment type {:?}: {err}",
                        attachment.mime_type
                    ))
                })?;
            form = form.part("files", part);
        }
        Ok(form)
    }
}

#[async_trait]
impl TransformService for HttpTransformService {
    fn name(&self) -> &str {
        self.feature.as_str()
    }

    async fn transform(
        &self,
        request: TransformRequest,
        cancel: CancellationToken,
    ) -> Result<String, RemoteError> {
        let form = self.build_form(&request)?;
        debug!(
            url = %self.url,
            history = request.history.len(),
            attachments = request.attachments.len(),
            "posting transformation request"
        );

        let send = self.client.post(&self.url).multipart(form).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RemoteError::Canceled),
            result = send => result.map_err(RemoteError::from_network)?,
        };

        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(RemoteError::Canceled),
            result = response.text() => result.map_err(RemoteError::from_network)?,
        };

        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), &body));
        }
        parse_success(self.feature, &body)
    }
}

/// Interpret a 2xx body: reject a declared failure, then pull the feature's
/// response field.
fn parse_success(feature: FeatureId, body: &str) -> Result<String, RemoteError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|err| RemoteError::Malformed(format!("response is not valid JSON: {err}")))?;

    if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
        let detail = extract_detail(body)
            .unwrap_or_else(|| "the service reported a failure without detail".to_string());
        return Err(RemoteError::Rejected(detail));
    }

    let field = feature.response_field();
    value
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RemoteError::Malformed(format!("response is missing the `{field}` field")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_base_and_endpoint() {
        let client = reqwest::Client::new();
        let with_slash = HttpTransformService::new(client.clone(), "http://host/", FeatureId::Chat);
        let without = HttpTransformService::new(client, "http://host", FeatureId::Chat);

        assert_eq!(with_slash.url(), "http://host/api/chat");
        assert_eq!(without.url(), "http://host/api/chat");
    }

    #[test]
    fn test_name_is_the_feature_identifier() {
        let service =
            HttpTransformService::new(reqwest::Client::new(), "http://host", FeatureId::FactCheck);
        assert_eq!(service.name(), "fact-check");
    }

    #[test]
    fn test_parse_success_maps_feature_fields() {
        let reply = parse_success(
            FeatureId::Chat,
            r#"{"success": true, "response": "hello there"}"#,
        )
        .unwrap();
        assert_eq!(reply, "hello there");

        let reply = parse_success(
            FeatureId::StudyBuddy,
            r#"{"success": true, "summary": "three key points", "original_length": 1200}"#,
        )
        .unwrap();
        assert_eq!(reply, "three key points");

        let reply = parse_success(
            FeatureId::PersonalDoctor,
            r#"{"success": true, "advice": "rest and hydrate"}"#,
        )
        .unwrap();
        assert_eq!(reply, "rest and hydrate");
    }

    #[test]
    fn test_parse_success_rejects_declared_failure() {
        let err = parse_success(
            FeatureId::Chat,
            r#"{"success": false, "detail": "no input provided"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(ref detail) if detail == "no input provided"));

        // Declared failure without any detail still rejects
        let err = parse_success(FeatureId::Chat, r#"{"success": false}"#).unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[test]
    fn test_parse_success_requires_the_response_field() {
        let err = parse_success(FeatureId::Polisher, r#"{"success": true}"#).unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
        assert!(err.to_string().contains("polished"));
    }

    #[test]
    fn test_parse_success_requires_json() {
        let err = parse_success(FeatureId::Chat, "<html>oops</html>").unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
    }

    #[test]
    fn test_build_form_accepts_attachments() {
        let service =
            HttpTransformService::new(reqwest::Client::new(), "http://host", FeatureId::Chat);
        let request = TransformRequest {
            text: String::new(),
            attachments: vec![
                crate::core::types::Attachment::new("a.txt", "text/plain", b"one".to_vec()),
                crate::core::types::Attachment::new("b.pdf", "application/pdf", b"two".to_vec()),
            ],
            ..Default::default()
        };
        assert!(service.build_form(&request).is_ok());
    }

    #[test]
    fn test_build_form_rejects_invalid_mime_type() {
        let service =
            HttpTransformService::new(reqwest::Client::new(), "http://host", FeatureId::Chat);
        let request = TransformRequest {
            attachments: vec![crate::core::types::Attachment::new(
                "a.txt",
                "not a mime type",
                b"one".to_vec(),
            )],
            ..Default::default()
        };
        assert!(matches!(
            service.build_form(&request).unwrap_err(),
            RemoteError::Malformed(_)
        ));
    }
}
