//! Core types for call QA evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The closed set of evaluation modules.
///
/// Each variant is one compliance check run against a call transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleName {
    /// Overall quality scorecard with auto-fail criteria
    FullQa,
    /// Required disclosures (recording notice, identification, ...)
    Disclosure,
    /// Customer asked not to be called again
    DncRequest,
    /// Profanity, misrepresentation, or other banned language
    ProhibitedLanguage,
}

impl ModuleName {
    /// Every module, in registration order.
    pub const ALL: [ModuleName; 4] = [
        ModuleName::FullQa,
        ModuleName::Disclosure,
        ModuleName::DncRequest,
        ModuleName::ProhibitedLanguage,
    ];

    /// The wire name used in storage keys, instance ids and notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleName::FullQa => "full_qa",
            ModuleName::Disclosure => "disclosure",
            ModuleName::DncRequest => "dnc_request",
            ModuleName::ProhibitedLanguage => "prohibited_language",
        }
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A module name that is not part of the closed set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown module: {0}")]
pub struct UnknownModuleName(pub String);

impl FromStr for ModuleName {
    type Err = UnknownModuleName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownModuleName(s.to_string()))
    }
}

/// Call metadata supplied with an evaluation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CallMetadata {
    /// Total call duration in seconds
    #[serde(default)]
    pub duration: u32,

    /// Seconds the agent and customer were actually talking
    #[serde(default)]
    pub talk_time: Option<u32>,

    /// Call outcome code (e.g. "sale", "no_answer")
    #[serde(default)]
    pub disposition: Option<String>,

    /// Campaign the call belongs to
    #[serde(default)]
    pub campaign: Option<String>,

    /// Agent display name, when the caller already knows it
    #[serde(default)]
    pub agent_name: Option<String>,

    /// When the call started
    #[serde(default)]
    pub call_started_at: Option<DateTime<Utc>>,
}

impl CallMetadata {
    /// Talk time used by trigger gates: explicit talk time, else duration.
    pub fn effective_talk_time(&self) -> u32 {
        self.talk_time.unwrap_or(self.duration)
    }
}

/// A call submitted for evaluation. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEvaluationRequest {
    pub call_id: String,
    pub agent_id: String,
    pub transcript: String,
    #[serde(default)]
    pub metadata: CallMetadata,
}

impl CallEvaluationRequest {
    pub fn new(
        call_id: impl Into<String>,
        agent_id: impl Into<String>,
        transcript: impl Into<String>,
        metadata: CallMetadata,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            agent_id: agent_id.into(),
            transcript: transcript.into(),
            metadata,
        }
    }

    /// Workflow instance id for one module of this call: `{call_id}-{module}`.
    pub fn instance_id(&self, module: ModuleName) -> String {
        format!("{}-{}", self.call_id, module.as_str())
    }
}

/// Outcome of one module evaluating one call.
///
/// Stored by upsert on `(call_id, module_name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleResult {
    pub module_name: ModuleName,

    /// Module-specific structured output from the evaluation backend
    pub payload: Value,

    pub has_violation: bool,

    pub violation_type: Option<String>,

    pub processing_time_ms: u64,
}

/// A notification-worthy violation.
///
/// Only ever derived from a result with `has_violation == true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub call_id: String,
    pub module_name: ModuleName,
    pub violation_type: String,
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: Option<String>,

    /// One-line human readable description
    pub summary: String,

    /// Transcript quotes or reasons backing the alert
    #[serde(default)]
    pub evidence: Vec<String>,

    /// Structured module-specific detail
    #[serde(default)]
    pub detail: Value,

    /// Call duration in seconds
    pub call_duration: u32,

    #[serde(default)]
    pub campaign: Option<String>,

    #[serde(default)]
    pub disposition: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Context available to alert extraction; taken from the originating request.
#[derive(Debug, Clone, Copy)]
pub struct AlertContext<'a> {
    pub call_id: &'a str,
    pub agent_id: &'a str,
    pub metadata: &'a CallMetadata,
}

impl<'a> AlertContext<'a> {
    pub fn from_request(request: &'a CallEvaluationRequest) -> Self {
        Self {
            call_id: &request.call_id,
            agent_id: &request.agent_id,
            metadata: &request.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_round_trip() {
        for module in ModuleName::ALL {
            assert_eq!(module.as_str().parse::<ModuleName>().unwrap(), module);
        }
        assert_eq!(
            "sentiment".parse::<ModuleName>(),
            Err(UnknownModuleName("sentiment".to_string()))
        );
    }

    #[test]
    fn test_module_name_serde_matches_as_str() {
        let json = serde_json::to_string(&ModuleName::DncRequest).unwrap();
        assert_eq!(json, "\"dnc_request\"");
    }

    #[test]
    fn test_effective_talk_time_falls_back_to_duration() {
        let mut meta = CallMetadata {
            duration: 200,
            ..Default::default()
        };
        assert_eq!(meta.effective_talk_time(), 200);

        meta.talk_time = Some(150);
        assert_eq!(meta.effective_talk_time(), 150);
    }

    #[test]
    fn test_instance_id() {
        let request = CallEvaluationRequest::new("call-42", "agent-7", "hi", CallMetadata::default());
        assert_eq!(request.instance_id(ModuleName::FullQa), "call-42-full_qa");
    }
}
