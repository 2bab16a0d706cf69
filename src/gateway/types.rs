//! Core types for the completion gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The exact JSON body sent to `POST {base_url}/chat/completions`.
///
/// Stored verbatim on the stage result so a run can be replayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRequest {
    pub model: String,
    pub temperature: f64,
    pub messages: Vec<Message>,
}

/// Token counts reported by the provider. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    fn from_json(value: &Value) -> Option<Self> {
        let usage = value.as_object()?;
        Some(Self {
            prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
            completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
            total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
        })
    }
}

/// Normalized response metadata kept alongside a stage output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Cost in USD as reported by the provider. `None` means "not reported",
    /// never zero.
    #[serde(default)]
    pub cost: Option<f64>,
}

impl ResponseMeta {
    /// Extract metadata from an arbitrary completion response body.
    ///
    /// Fields with an unexpected JSON type are treated as absent.
    pub fn from_json(body: &Value) -> Self {
        Self {
            id: body.get("id").and_then(Value::as_str).map(str::to_string),
            model: body.get("model").and_then(Value::as_str).map(str::to_string),
            created: body.get("created").and_then(Value::as_i64),
            usage: body.get("usage").and_then(TokenUsage::from_json),
            cost: extract_cost(body),
        }
    }

    pub fn total_tokens(&self) -> Option<u64> {
        self.usage.as_ref().and_then(|u| u.total_tokens)
    }
}

/// Cost precedence: `usage.total_cost`, then `usage.cost`, then top-level `cost`.
pub fn extract_cost(body: &Value) -> Option<f64> {
    let usage = body.get("usage");
    usage
        .and_then(|u| u.get("total_cost"))
        .and_then(Value::as_f64)
        .or_else(|| usage.and_then(|u| u.get("cost")).and_then(Value::as_f64))
        .or_else(|| body.get("cost").and_then(Value::as_f64))
}

/// Content of the first choice, or empty when the provider sent none.
pub fn extract_content(body: &Value) -> String {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Parsed result of one successful stage completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub request: StageRequest,
    pub response: ResponseMeta,
}
