//! Credential handling for providers and notification sinks.
//!
//! Credentials are wrapped in [`ApiCredential`] as soon as they are read.
//! `Debug` and `Display` print `[REDACTED]`; the raw value is only reachable
//! through [`ApiCredential::expose`], called where a header is set.
//!
//! ```ignore
//! let key = ApiCredential::from_config_or_env(&options, "api_key", "ANTHROPIC_API_KEY", "Anthropic API key")?;
//! request.header("x-api-key", key.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
///
/// Shown in logs and errors in place of the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Runtime config file (provider options or notification settings)
    Config,
    /// Environment variable fallback
    Environment,
    /// Handed in directly by the embedding code
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A secret API key or token. Zeroed on drop by `secrecy`.
pub struct ApiCredential {
    value: SecretString,

    /// Where `value` came from
    source: CredentialSource,

    /// Human-readable label, e.g. "Anthropic API key"
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read `config_key` from the options block, else the `env_var` variable.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::resolve(config, config_key, env_var, name, |var| std::env::var(var).ok())
    }

    /// Same as [`from_config_or_env`](Self::from_config_or_env) with an
    /// injectable environment lookup.
    pub fn resolve<F>(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
        env: F,
    ) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = config[config_key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        if let Some(value) = env(env_var) {
            return Ok(Self::new(value, CredentialSource::Environment, name));
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set '{}' in config or {} environment variable",
            name, config_key, env_var
        )))
    }

    /// Raw value, for the point of use only.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk-live-0123456789";

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_never_printed() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Config, "Webhook token");
        let debug = format!("{:?}", cred);
        let display = format!("{}", cred);

        assert!(!debug.contains(SECRET));
        assert!(!display.contains(SECRET));
        assert_eq!(display, "Webhook token from config [REDACTED]");
        assert_eq!(cred.expose(), SECRET);
    }

    #[test]
    fn test_config_wins_over_env() {
        let config = serde_json::json!({"api_key": "from-config"});
        let cred = ApiCredential::resolve(&config, "api_key", "KEY", "Key", |_| {
            Some("from-env".to_string())
        })
        .unwrap();
        assert_eq!(cred.expose(), "from-config");
        assert_eq!(cred.source(), CredentialSource::Config);
    }

    #[test]
    fn test_env_fallback() {
        let cred = ApiCredential::resolve(&serde_json::json!({}), "api_key", "KEY", "Key", |var| {
            (var == "KEY").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(cred.expose(), "from-env");
        assert_eq!(cred.source(), CredentialSource::Environment);
    }

    #[test]
    fn test_missing_names_both_sources() {
        let err = ApiCredential::resolve(&serde_json::json!({}), "api_key", "CALLQA_TEST_KEY", "Key", no_env)
            .unwrap_err()
            .to_string();
        assert!(err.contains("'api_key'"));
        assert!(err.contains("CALLQA_TEST_KEY"));
    }
}
