//! Evaluation modules.
//!
//! A module is one compliance check. The async call to the evaluation
//! backend lives in the runtime; this crate owns everything deterministic
//! about a module:
//!
//! - the JSON Schema its payload must satisfy
//! - how `has_violation` / `violation_type` are read from the payload
//! - how a violating result maps to alerts
//!
//! | Module | Violation rule | Alerts |
//! |--------|----------------|--------|
//! | `full_qa` | backend flag | one per call |
//! | `disclosure` | backend flag | one per missing disclosure |
//! | `dnc_request` | recomputed: requested and not honored | one per call |
//! | `prohibited_language` | backend flag | one per category |

mod disclosure;
mod dnc;
mod full_qa;
mod prohibited;

pub use disclosure::DisclosureModule;
pub use dnc::DncRequestModule;
pub use full_qa::{FullQaModule, LegacyQaRecord};
pub use prohibited::ProhibitedLanguageModule;

use chrono::Utc;
use serde_json::Value;

use crate::schema::{validate_payload, SchemaError};
use crate::types::{Alert, AlertContext, ModuleName, ModuleResult};

/// Violation judgment read from a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub has_violation: bool,
    pub violation_type: Option<String>,
}

/// Deterministic side of an evaluation module.
pub trait ModuleSpec: Send + Sync {
    /// Which module this is.
    fn name(&self) -> ModuleName;

    /// JSON Schema for the backend payload.
    fn schema(&self) -> &'static Value;

    /// Tag naming the schema in backend requests.
    fn schema_tag(&self) -> &'static str {
        self.name().as_str()
    }

    /// Read the violation judgment from a schema-valid payload.
    fn verdict(&self, payload: &Value) -> Verdict {
        reported_verdict(payload, self.default_violation_type())
    }

    /// Violation type used when the payload flags a violation without naming it.
    fn default_violation_type(&self) -> &'static str;

    /// Map a violating result to alerts.
    ///
    /// Only called for results with `has_violation == true`.
    fn alerts(&self, result: &ModuleResult, ctx: &AlertContext<'_>) -> Vec<Alert>;
}

static FULL_QA: FullQaModule = FullQaModule;
static DISCLOSURE: DisclosureModule = DisclosureModule;
static DNC_REQUEST: DncRequestModule = DncRequestModule;
static PROHIBITED_LANGUAGE: ProhibitedLanguageModule = ProhibitedLanguageModule;

/// The [`ModuleSpec`] for a module name.
pub fn spec_for(name: ModuleName) -> &'static dyn ModuleSpec {
    match name {
        ModuleName::FullQa => &FULL_QA,
        ModuleName::Disclosure => &DISCLOSURE,
        ModuleName::DncRequest => &DNC_REQUEST,
        ModuleName::ProhibitedLanguage => &PROHIBITED_LANGUAGE,
    }
}

/// Validate a payload and turn it into a result.
pub fn build_result(
    spec: &dyn ModuleSpec,
    payload: Value,
    processing_time_ms: u64,
) -> Result<ModuleResult, SchemaError> {
    validate_payload(spec.schema(), &payload)?;
    Ok(assemble(spec, payload, processing_time_ms))
}

/// Turn an already validated payload into a result.
pub fn assemble(spec: &dyn ModuleSpec, payload: Value, processing_time_ms: u64) -> ModuleResult {
    let verdict = spec.verdict(&payload);

    ModuleResult {
        module_name: spec.name(),
        payload,
        has_violation: verdict.has_violation,
        violation_type: verdict.violation_type,
        processing_time_ms,
    }
}

/// Alerts for a result. Non-violating results never produce alerts.
pub fn extract_alerts(spec: &dyn ModuleSpec, result: &ModuleResult, ctx: &AlertContext<'_>) -> Vec<Alert> {
    if !result.has_violation {
        return Vec::new();
    }
    spec.alerts(result, ctx)
}

/// Verdict taken from the payload's own `has_violation` / `violation_type`.
pub(crate) fn reported_verdict(payload: &Value, default_type: &str) -> Verdict {
    let has_violation = payload["has_violation"].as_bool().unwrap_or(false);
    let violation_type = if has_violation {
        Some(
            payload["violation_type"]
                .as_str()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(default_type)
                .to_string(),
        )
    } else {
        None
    };

    Verdict {
        has_violation,
        violation_type,
    }
}

/// Alert pre-filled with call context; modules set summary, evidence and detail.
pub(crate) fn base_alert(result: &ModuleResult, ctx: &AlertContext<'_>) -> Alert {
    Alert {
        call_id: ctx.call_id.to_string(),
        module_name: result.module_name,
        violation_type: result
            .violation_type
            .clone()
            .unwrap_or_else(|| "violation".to_string()),
        agent_id: ctx.agent_id.to_string(),
        agent_name: ctx.metadata.agent_name.clone(),
        summary: String::new(),
        evidence: string_list(&result.payload, "evidence"),
        detail: Value::Null,
        call_duration: ctx.metadata.duration,
        campaign: ctx.metadata.campaign.clone(),
        disposition: ctx.metadata.disposition.clone(),
        created_at: Utc::now(),
    }
}

/// String array field, ignoring non-string entries.
pub fn string_list(payload: &Value, key: &str) -> Vec<String> {
    payload[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// The payload's summary, or a fallback.
pub(crate) fn payload_summary(payload: &Value, fallback: &str) -> String {
    payload["summary"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_for_covers_every_module() {
        for name in ModuleName::ALL {
            assert_eq!(spec_for(name).name(), name);
            assert_eq!(spec_for(name).schema_tag(), name.as_str());
        }
    }

    #[test]
    fn test_build_result_rejects_schema_mismatch() {
        let spec = spec_for(ModuleName::FullQa);
        let result = build_result(spec, json!({"summary": "missing flag"}), 10);
        assert!(matches!(result, Err(SchemaError::Mismatch(_))));
    }

    #[test]
    fn test_non_violating_result_has_no_alerts() {
        let meta = metadata();
        let ctx = AlertContext {
            call_id: "c1",
            agent_id: "a1",
            metadata: &meta,
        };
        for name in ModuleName::ALL {
            let spec = spec_for(name);
            let mut result = ModuleResult {
                module_name: name,
                payload: json!({"has_violation": true, "evidence": ["x"]}),
                has_violation: false,
                violation_type: None,
                processing_time_ms: 0,
            };
            assert!(extract_alerts(spec, &result, &ctx).is_empty());

            // Flag flipped: module mapping is consulted
            result.has_violation = true;
            result.violation_type = Some("t".to_string());
            assert!(extract_alerts(spec, &result, &ctx)
                .iter()
                .all(|a| a.call_id == "c1" && a.agent_id == "a1"));
        }
    }

    #[test]
    fn test_reported_verdict_defaults_type() {
        let verdict = reported_verdict(&json!({"has_violation": true, "violation_type": ""}), "dflt");
        assert_eq!(verdict.violation_type.as_deref(), Some("dflt"));

        let verdict = reported_verdict(&json!({"has_violation": false, "violation_type": "x"}), "dflt");
        assert_eq!(verdict, Verdict { has_violation: false, violation_type: None });
    }
}
