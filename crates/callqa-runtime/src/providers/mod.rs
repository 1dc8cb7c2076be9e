//! LLM provider abstraction behind the evaluation backend.
//!
//! A provider turns chat messages into completion text and nothing more;
//! JSON recovery and schema checks live in [`crate::backend`].
//!
//! ## Security
//!
//! Providers hold credentials as [`ApiCredential`], which never prints its
//! value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

/// Errors from LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Settings for one completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionConfig {
    /// Model identifier sent to the provider
    pub model: String,

    /// Upper bound on generated tokens
    pub max_tokens: u32,

    /// 0.0 for deterministic output
    pub temperature: f32,

    /// Per-request timeout enforced by the provider
    pub timeout: Duration,

    /// Mark the system prompt cacheable where the provider supports it
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 2000,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
            prompt_caching: true,
        }
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message for completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,

    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    /// Concatenated text blocks; may be empty
    pub content: String,

    /// Token counts reported by the provider
    pub usage: TokenUsage,

    /// Model that actually served the request
    pub model: String,

    /// Why generation stopped, e.g. "end_turn" or "max_tokens"
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Input tokens, system prompt and transcript included
    pub prompt_tokens: u32,

    /// Generated tokens
    pub completion_tokens: u32,

    /// Input tokens served from the prompt cache
    pub cache_read_tokens: u32,

    /// Input tokens written to the prompt cache
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    /// Prompt plus completion tokens.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction so the backend can swap LLM vendors.
///
/// This is the only place the runtime talks to a model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Whether the provider looks usable (credentials present, etc.).
    async fn health_check(&self) -> bool;

    /// Provider name for logs.
    fn name(&self) -> &str;
}
