//! Evaluation backend: one structured completion per call.
//!
//! `evaluate` sends the prompts to the provider, recovers a JSON object from
//! whatever text comes back, checks it against the module's schema and
//! decodes it. It makes exactly one attempt; callers wrap it in a
//! [`RetryExecutor`](crate::resilience::RetryExecutor) with whatever policy
//! fits (pipeline or durable step).

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use callqa_core::{recover_json, validate_payload, RecoveryFailed, SchemaError};

use crate::config::BackendConfig;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};

/// Why a backend call produced no usable payload. All kinds are retryable.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("backend response is not valid JSON: {0}")]
    InvalidJson(#[from] RecoveryFailed),

    #[error("backend response failed schema validation for '{tag}': {source}")]
    SchemaValidationFailed {
        tag: String,
        #[source]
        source: SchemaError,
    },

    #[error("backend payload for '{tag}' could not be decoded: {message}")]
    Decode { tag: String, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Structured-output client over an [`LlmProvider`].
pub struct EvaluationBackend {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
}

impl std::fmt::Debug for EvaluationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationBackend")
            .field("provider", &self.provider.name())
            .field("model", &self.completion.model)
            .finish()
    }
}

impl EvaluationBackend {
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self { provider, completion }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &BackendConfig) -> Self {
        Self::new(provider, config.completion())
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }

    /// One evaluation, decoded into `T`.
    ///
    /// `schema_tag` names the schema in logs and errors.
    pub async fn evaluate<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &Value,
        schema_tag: Option<&str>,
    ) -> Result<T, BackendError> {
        let tag = schema_tag.unwrap_or("payload");
        let payload = self.evaluate_value(system_prompt, user_prompt, schema, tag).await?;

        serde_json::from_value(payload).map_err(|e| BackendError::Decode {
            tag: tag.to_string(),
            message: e.to_string(),
        })
    }

    /// One evaluation, returned as a schema-valid JSON object.
    pub async fn evaluate_value(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &Value,
        tag: &str,
    ) -> Result<Value, BackendError> {
        let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)];
        let response = self.provider.complete(messages, &self.completion).await?;

        if response.content.trim().is_empty() {
            tracing::warn!(
                schema = tag,
                stop_reason = ?response.stop_reason,
                "Empty backend response"
            );
            return Err(BackendError::EmptyResponse);
        }

        let payload = recover_json(&response.content).inspect_err(|e| {
            tracing::warn!(schema = tag, error = %e, "Unrecoverable backend output");
        })?;

        validate_payload(schema, &payload).map_err(|source| BackendError::SchemaValidationFailed {
            tag: tag.to_string(),
            source,
        })?;

        tracing::debug!(
            schema = tag,
            provider = self.provider.name(),
            tokens = response.usage.total(),
            "Backend payload accepted"
        );

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CompletionResponse;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    struct Reply(&'static str);

    #[async_trait]
    impl LlmProvider for Reply {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
                ..Default::default()
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "reply"
        }
    }

    fn backend(text: &'static str) -> EvaluationBackend {
        EvaluationBackend::new(Arc::new(Reply(text)), CompletionConfig::default())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["score"],
            "properties": { "score": { "type": "integer" } }
        })
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Scored {
        score: i64,
    }

    #[tokio::test]
    async fn test_fenced_output_decoded() {
        let result: Scored = backend("Here you go:\n```json\n{\"score\": 7,}\n```")
            .evaluate("sys", "user", &schema(), Some("scored"))
            .await
            .unwrap();
        assert_eq!(result, Scored { score: 7 });
    }

    #[tokio::test]
    async fn test_empty_response() {
        let result: Result<Scored, _> = backend("  \n").evaluate("s", "u", &schema(), None).await;
        assert!(matches!(result, Err(BackendError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let result: Result<Scored, _> = backend("I cannot help with that.")
            .evaluate("s", "u", &schema(), None)
            .await;
        assert!(matches!(result, Err(BackendError::InvalidJson(_))));
    }

    #[tokio::test]
    async fn test_schema_mismatch_names_tag() {
        let result: Result<Scored, _> = backend("{\"score\": \"high\"}")
            .evaluate("s", "u", &schema(), Some("scored"))
            .await;
        match result {
            Err(BackendError::SchemaValidationFailed { tag, .. }) => assert_eq!(tag, "scored"),
            other => panic!("expected schema failure, got {:?}", other),
        }
    }
}
