//! OpenRouter adapter for stage completions.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use super::error::{CompletionError, ErrorContext};
use super::types::*;
use super::CompletionClient;
use crate::prompts::build_stage_request;
use crate::stages::StageConfig;

// =============================================================================
// OPENROUTER ADAPTER
// =============================================================================

/// Default OpenRouter API root.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Value of the `X-Title` header sent with every request.
pub const DEFAULT_APP_TITLE: &str = "Thinktank Pipeline";

/// Value of the `HTTP-Referer` header when no origin is configured.
pub const DEFAULT_REFERER: &str = "http://localhost";

/// OpenRouter API adapter for chat completions.
///
/// One adapter holds one credential and base URL. No request timeout is set:
/// a hung call blocks the stage until the server answers or drops the socket.
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    referer: String,
    app_title: String,
}

impl OpenRouterAdapter {
    /// Create from API key against the default base URL.
    pub fn new(api_key: impl Into<String>) -> Result<Self, CompletionError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, None, None)
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, CompletionError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| CompletionError::config("OPENROUTER_API_KEY not set"))?;

        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let referer = std::env::var("OPENROUTER_REFERER").ok();
        let app_title = std::env::var("OPENROUTER_APP_TITLE").ok();

        Self::with_config(api_key, base_url, referer, app_title)
    }

    /// Create with custom configuration and a fresh HTTP client.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, CompletionError> {
        let client = Self::http_client()?;
        Ok(Self::with_client(client, api_key, base_url, referer, app_title))
    }

    /// Create around an existing HTTP client so connection pools are shared.
    pub fn with_client(
        client: reqwest::Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            referer: referer.unwrap_or_else(|| DEFAULT_REFERER.to_string()),
            app_title: app_title.unwrap_or_else(|| DEFAULT_APP_TITLE.to_string()),
        }
    }

    /// Build the shared HTTP client.
    pub fn http_client() -> Result<reqwest::Client, CompletionError> {
        reqwest::Client::builder()
            .build()
            .map_err(|e| CompletionError::config(format!("Failed to create HTTP client: {e}")))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Send one request payload and normalize the response.
    pub async fn send(&self, request: StageRequest) -> Result<Completion, CompletionError> {
        let response = self
            .client
            .post(self.chat_url())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header("HTTP-Referer", self.referer.as_str())
            .header("X-Title", self.app_title.as_str())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = response.text().await?;

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = match request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        };

        if !status.is_success() {
            let message = if body.is_empty() {
                format!("OpenRouter request failed (status {})", status.as_u16())
            } else {
                body
            };
            return Err(CompletionError::request_failed_with_context(message, ctx));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|e| {
            CompletionError::request_failed_with_context(
                format!("invalid JSON in response: {e}"),
                ctx.clone(),
            )
        })?;

        let content = extract_content(&parsed);
        let meta = ResponseMeta::from_json(&parsed);
        debug!(
            model = %request.model,
            response_id = meta.id.as_deref().unwrap_or("-"),
            total_tokens = meta.total_tokens(),
            cost = meta.cost,
            "completion received"
        );

        Ok(Completion {
            content,
            request,
            response: meta,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenRouterAdapter {
    async fn complete(
        &self,
        stage: &StageConfig,
        problem: &str,
        prior_outputs: &[String],
    ) -> Result<Completion, CompletionError> {
        self.send(build_stage_request(stage, problem, prior_outputs))
            .await
    }
}
