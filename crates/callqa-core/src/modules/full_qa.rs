//! Full QA scorecard module.
//!
//! Scores the whole call and flags auto-fail criteria. A violation is any
//! auto-fail hit, as reported by the backend.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{Alert, AlertContext, ModuleName, ModuleResult};

use super::{base_alert, payload_summary, string_list, ModuleSpec};

lazy_static! {
    static ref SCHEMA: Value = json!({
        "type": "object",
        "required": ["has_violation", "overall_score", "summary"],
        "properties": {
            "has_violation": { "type": "boolean" },
            "violation_type": { "type": ["string", "null"] },
            "overall_score": { "type": "number", "minimum": 0, "maximum": 100 },
            "auto_fail_reasons": { "type": "array", "items": { "type": "string" } },
            "category_scores": {
                "type": "object",
                "additionalProperties": { "type": "number" }
            },
            "evidence": { "type": "array", "items": { "type": "string" } },
            "summary": { "type": "string" }
        }
    });
}

/// The full QA module.
pub struct FullQaModule;

impl ModuleSpec for FullQaModule {
    fn name(&self) -> ModuleName {
        ModuleName::FullQa
    }

    fn schema(&self) -> &'static Value {
        &SCHEMA
    }

    fn default_violation_type(&self) -> &'static str {
        "auto_fail"
    }

    fn alerts(&self, result: &ModuleResult, ctx: &AlertContext<'_>) -> Vec<Alert> {
        let payload = &result.payload;
        let score = payload["overall_score"].as_f64().unwrap_or(0.0);
        let reasons = string_list(payload, "auto_fail_reasons");

        let mut alert = base_alert(result, ctx);
        alert.summary = if reasons.is_empty() {
            format!("QA auto-fail (score {:.0}/100): {}", score, payload_summary(payload, "no reason given"))
        } else {
            format!("QA auto-fail (score {:.0}/100): {}", score, reasons.join("; "))
        };
        alert.detail = json!({
            "overall_score": score,
            "auto_fail_reasons": reasons,
            "category_scores": payload["category_scores"].clone(),
        });

        vec![alert]
    }
}

/// Row shape of the legacy per-call QA table, keyed by `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyQaRecord {
    pub call_id: String,
    pub agent_id: String,
    pub overall_score: f64,
    pub auto_fail: bool,
    pub summary: String,
    pub payload: Value,
}

impl LegacyQaRecord {
    /// Mirror a `full_qa` result into the legacy shape.
    ///
    /// Returns `None` for results from any other module.
    pub fn from_result(result: &ModuleResult, call_id: &str, agent_id: &str) -> Option<Self> {
        if result.module_name != ModuleName::FullQa {
            return None;
        }

        Some(Self {
            call_id: call_id.to_string(),
            agent_id: agent_id.to_string(),
            overall_score: result.payload["overall_score"].as_f64().unwrap_or(0.0),
            auto_fail: result.has_violation,
            summary: payload_summary(&result.payload, ""),
            payload: result.payload.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{metadata, result};
    use super::super::extract_alerts;
    use super::*;

    #[test]
    fn test_passing_call_has_no_violation() {
        let r = result(
            &FullQaModule,
            json!({"has_violation": false, "overall_score": 94, "summary": "Clean call"}),
        );
        assert!(!r.has_violation);
        assert_eq!(r.violation_type, None);
        assert_eq!(r.processing_time_ms, 1200);
    }

    #[test]
    fn test_auto_fail_alert() {
        let r = result(
            &FullQaModule,
            json!({
                "has_violation": true,
                "overall_score": 41,
                "auto_fail_reasons": ["Misquoted price", "No closing"],
                "evidence": ["It's only $5 a month forever"],
                "summary": "Auto-fail"
            }),
        );
        assert_eq!(r.violation_type.as_deref(), Some("auto_fail"));

        let meta = metadata();
        let ctx = AlertContext {
            call_id: "call-1",
            agent_id: "agent-1",
            metadata: &meta,
        };
        let alerts = extract_alerts(&FullQaModule, &r, &ctx);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].summary, "QA auto-fail (score 41/100): Misquoted price; No closing");
        assert_eq!(alerts[0].evidence, vec!["It's only $5 a month forever".to_string()]);
        assert_eq!(alerts[0].call_duration, 420);
        assert_eq!(alerts[0].agent_name.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_score_out_of_range_rejected() {
        let payload = json!({"has_violation": false, "overall_score": 140, "summary": "x"});
        assert!(super::super::build_result(&FullQaModule, payload, 0).is_err());
    }

    #[test]
    fn test_legacy_record_only_for_full_qa() {
        let r = result(
            &FullQaModule,
            json!({"has_violation": false, "overall_score": 88.5, "summary": "Good"}),
        );
        let legacy = LegacyQaRecord::from_result(&r, "call-1", "agent-1").unwrap();
        assert_eq!(legacy.overall_score, 88.5);
        assert!(!legacy.auto_fail);
        assert_eq!(legacy.summary, "Good");

        let mut other = r.clone();
        other.module_name = ModuleName::Disclosure;
        assert!(LegacyQaRecord::from_result(&other, "call-1", "agent-1").is_none());
    }
}
