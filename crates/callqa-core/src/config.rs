//! Module trigger configuration parsing from YAML/JSON.
//!
//! Module configs are owned outside this crate and may change between runs,
//! so callers read them fresh for every evaluation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::types::ModuleName;

/// Errors that can occur when loading module configs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Trigger configuration for one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfig {
    /// Disabled modules never run, whatever the other fields say
    #[serde(default)]
    pub enabled: bool,

    /// Minimum effective talk time in seconds
    #[serde(default)]
    pub min_talk_time: u32,

    /// Run only for these dispositions (absent or empty: any)
    #[serde(default)]
    pub allowed_dispositions: Option<Vec<String>>,

    /// Run only for these campaigns (absent or empty: any)
    #[serde(default)]
    pub allowed_campaigns: Option<Vec<String>>,
}

impl ModuleConfig {
    /// An enabled module with no talk-time floor and no allow-lists.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_min_talk_time(mut self, seconds: u32) -> Self {
        self.min_talk_time = seconds;
        self
    }

    pub fn with_dispositions<I, S>(mut self, dispositions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_dispositions = Some(dispositions.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_campaigns<I, S>(mut self, campaigns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_campaigns = Some(campaigns.into_iter().map(Into::into).collect());
        self
    }
}

/// Configs for every known module, keyed by module name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfigs {
    #[serde(default)]
    pub modules: BTreeMap<ModuleName, ModuleConfig>,
}

impl ModuleConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configs from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let configs: ModuleConfigs = serde_yaml::from_str(yaml)?;
        configs.validate()?;
        Ok(configs)
    }

    /// Parse configs from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let configs: ModuleConfigs = serde_json::from_str(json)?;
        configs.validate()?;
        Ok(configs)
    }

    /// Parse configs from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn insert(&mut self, module: ModuleName, config: ModuleConfig) {
        self.modules.insert(module, config);
    }

    pub fn with(mut self, module: ModuleName, config: ModuleConfig) -> Self {
        self.insert(module, config);
        self
    }

    pub fn get(&self, module: ModuleName) -> Option<&ModuleConfig> {
        self.modules.get(&module)
    }

    /// Reject allow-lists containing blank entries; they can never match.
    fn validate(&self) -> Result<(), ConfigError> {
        for (module, config) in &self.modules {
            let lists = [
                ("allowed_dispositions", &config.allowed_dispositions),
                ("allowed_campaigns", &config.allowed_campaigns),
            ];
            for (field, list) in lists {
                if let Some(values) = list {
                    if values.iter().any(|v| v.trim().is_empty()) {
                        return Err(ConfigError::ValidationError(format!(
                            "{}.{} contains an empty entry",
                            module, field
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
