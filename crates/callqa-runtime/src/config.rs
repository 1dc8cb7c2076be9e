//! Runtime configuration.
//!
//! Loaded from YAML. Durations are human-readable strings ("5s", "2m").
//!
//! ```yaml
//! backend:
//!   provider: anthropic
//!   model: claude-sonnet-4-5-20250514
//!   request_timeout: 60s
//!   retry: { max_retries: 2, base_delay: 1s, max_delay: 10s, timeout: 2m }
//! steps:
//!   evaluate: { max_retries: 3, base_delay: 5s, attempt_timeout: 5m }
//! notifications:
//!   webhook_url: https://hooks.example.com/qa
//! directory:
//!   cache_ttl: 5m
//!   managers: { agent-7: lead@example.com }
//! state_dir: /var/lib/callqa
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::StepPolicies;
use crate::providers::CompletionConfig;
use crate::resilience::RetryPolicy;

pub const ENV_WEBHOOK_URL: &str = "CALLQA_WEBHOOK_URL";
pub const ENV_STATE_DIR: &str = "CALLQA_STATE_DIR";
pub const ENV_MODEL: &str = "CALLQA_MODEL";

/// Errors loading runtime configuration.
#[derive(Error, Debug)]
pub enum RuntimeConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub steps: StepPolicies,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Directory for durable workflow state; in-memory when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, RuntimeConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RuntimeConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Apply `CALLQA_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; blank values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_WEBHOOK_URL) {
            self.notifications.webhook_url = Some(url);
        }
        if let Some(dir) = get(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(model) = get(ENV_MODEL) {
            self.backend.model = model;
        }
        self
    }

    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        if self.backend.max_tokens == 0 {
            return Err(RuntimeConfigError::Invalid("backend.max_tokens must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.backend.temperature) {
            return Err(RuntimeConfigError::Invalid(
                "backend.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if let Some(url) = &self.notifications.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(RuntimeConfigError::Invalid(format!(
                    "notifications.webhook_url is not an http(s) URL: {}",
                    url
                )));
            }
        }
        Ok(())
    }
}

/// Evaluation backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,

    #[serde(default = "default_prompt_caching")]
    pub prompt_caching: bool,

    /// Retry policy used by the pipeline runner around each module
    #[serde(default = "default_backend_retry")]
    pub retry: RetryPolicy,

    /// Passed to the provider factory (api_key, base_url, ...)
    #[serde(default)]
    pub provider_options: JsonValue,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    CompletionConfig::default().model
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_prompt_caching() -> bool {
    true
}

fn default_backend_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(10))
        .with_timeout(Duration::from_secs(120))
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            request_timeout: default_request_timeout(),
            prompt_caching: default_prompt_caching(),
            retry: default_backend_retry(),
            provider_options: JsonValue::Null,
        }
    }
}

impl BackendConfig {
    pub fn completion(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.request_timeout,
            prompt_caching: self.prompt_caching,
        }
    }
}

/// Notification sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Unset means notifications are silently dropped
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Bearer token for the webhook, if it needs one
    #[serde(default)]
    pub webhook_token: Option<String>,

    #[serde(default = "default_webhook_timeout", with = "duration_str")]
    pub timeout: Duration,
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_token: None,
            timeout: default_webhook_timeout(),
        }
    }
}

/// Agent to manager directory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_cache_ttl", with = "duration_str")]
    pub cache_ttl: Duration,

    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,

    /// Static agent id to manager email entries
    #[serde(default)]
    pub managers: BTreeMap<String, String>,
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_cache_capacity() -> u64 {
    1_000
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            capacity: default_cache_capacity(),
            managers: BTreeMap::new(),
        }
    }
}

/// Serde adapter for `Duration` as a humantime string.
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Duration>` as a humantime string.
pub mod option_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::Backoff;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.backend.provider, "anthropic");
        assert_eq!(config.backend.retry.max_retries, 2);
        assert_eq!(config.backend.retry.timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.steps.evaluate.max_retries, 3);
        assert_eq!(config.steps.log_completion.backoff, Backoff::Constant);
        assert!(config.notifications.webhook_url.is_none());
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let config = RuntimeConfig::from_yaml(
            r#"
backend:
  model: claude-haiku
  request_timeout: 30s
steps:
  store_result:
    max_retries: 5
    base_delay: 500ms
directory:
  cache_ttl: 1m
  managers:
    agent-7: lead@example.com
state_dir: /tmp/callqa
"#,
        )
        .unwrap();

        assert_eq!(config.backend.model, "claude-haiku");
        assert_eq!(config.backend.request_timeout, Duration::from_secs(30));
        assert_eq!(config.backend.max_tokens, 2000);
        assert_eq!(config.steps.store_result.max_retries, 5);
        assert_eq!(config.steps.store_result.base_delay, Duration::from_millis(500));
        // Untouched steps keep their defaults
        assert_eq!(config.steps.evaluate.base_delay, Duration::from_secs(5));
        assert_eq!(config.directory.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.directory.managers["agent-7"], "lead@example.com");
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/callqa")));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result = RuntimeConfig::from_yaml("backend:\n  request_timeout: soon\n");
        assert!(matches!(result, Err(RuntimeConfigError::Yaml(_))));
    }

    #[test]
    fn test_bad_webhook_url_rejected() {
        let result = RuntimeConfig::from_yaml("notifications:\n  webhook_url: hooks.example.com\n");
        assert!(matches!(result, Err(RuntimeConfigError::Invalid(_))));
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::default().with_overrides(|key| match key {
            ENV_WEBHOOK_URL => Some("https://hooks.example.com/qa".to_string()),
            ENV_MODEL => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(
            config.notifications.webhook_url.as_deref(),
            Some("https://hooks.example.com/qa")
        );
        assert_eq!(config.backend.model, default_model());
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn test_durations_round_trip_as_strings() {
        let yaml = serde_yaml::to_string(&RuntimeConfig::default()).unwrap();
        assert!(yaml.contains("request_timeout: 1m"));
        let back = RuntimeConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back, RuntimeConfig::default());
    }
}
