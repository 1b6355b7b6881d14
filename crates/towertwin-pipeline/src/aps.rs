//! Model-translation requester.
//!
//! Submits the raw source file to the remote derivative-translation job
//! endpoint and extracts the opaque URN the viewer dereferences later.
//! Fire-and-forget: the remote side translates asynchronously and the
//! pipeline never polls for completion.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde_json::Value;

use crate::error::PipelineError;
use crate::session::UserSession;

#[async_trait]
pub trait TranslationClient: Send + Sync {
    /// Returns the translation URN on success.
    async fn request_translation(
        &self,
        session: &UserSession,
        file_name: &str,
        source: Bytes,
    ) -> Result<String, PipelineError>;
}

pub struct ApsTranslationClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ApsTranslationClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TranslationClient for ApsTranslationClient {
    async fn request_translation(
        &self,
        session: &UserSession,
        file_name: &str,
        source: Bytes,
    ) -> Result<String, PipelineError> {
        let part = Part::bytes(source.to_vec()).file_name(file_name.to_string());
        let form = Form::new()
            .part("file", part)
            .text("fileName", file_name.to_string());

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&session.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|err| PipelineError::TranslationRequest(err.to_string()))?;

        // check the status before decoding; error bodies are often not JSON
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::TranslationRequest(format!(
                "endpoint returned {status}: {}",
                body.trim()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| PipelineError::TranslationRequest(err.to_string()))?;
        urn_from_response(&body)
    }
}

pub(crate) fn urn_from_response(body: &Value) -> Result<String, PipelineError> {
    body.get("urn")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::TranslationRequest("response lacks a translation urn".to_string())
        })
}
