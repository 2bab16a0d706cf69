//! Completion gateway for OpenRouter chat completions.

pub mod error;
pub mod openrouter;
pub mod types;

use async_trait::async_trait;

use crate::stages::StageConfig;

pub use error::{CompletionError, ErrorContext};
pub use openrouter::{OpenRouterAdapter, DEFAULT_APP_TITLE, DEFAULT_BASE_URL, DEFAULT_REFERER};
pub use types::*;

/// Turns one stage invocation into exactly one outbound request.
///
/// `prior_outputs` holds the outputs of the already-completed stages of the
/// current run, in pipeline order; it is empty for the first stage.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        stage: &StageConfig,
        problem: &str,
        prior_outputs: &[String],
    ) -> Result<Completion, CompletionError>;
}
