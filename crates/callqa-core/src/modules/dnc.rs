//! Do-not-call request module.
//!
//! The backend reports two facts: whether the customer asked not to be
//! called again, and whether the agent honored it. The violation flag is
//! always recomputed from those two facts; the backend's own
//! `has_violation` is ignored for this module.

use lazy_static::lazy_static;
use serde_json::{json, Value};

use crate::types::{Alert, AlertContext, ModuleName, ModuleResult};

use super::{base_alert, payload_summary, ModuleSpec, Verdict};

lazy_static! {
    static ref SCHEMA: Value = json!({
        "type": "object",
        "required": ["customer_requested_dnc", "agent_honored_request"],
        "properties": {
            "has_violation": { "type": "boolean" },
            "violation_type": { "type": ["string", "null"] },
            "customer_requested_dnc": { "type": "boolean" },
            "agent_honored_request": { "type": "boolean" },
            "request_quote": { "type": ["string", "null"] },
            "evidence": { "type": "array", "items": { "type": "string" } },
            "summary": { "type": "string" }
        }
    });
}

/// Flags ignored do-not-call requests.
pub struct DncRequestModule;

impl ModuleSpec for DncRequestModule {
    fn name(&self) -> ModuleName {
        ModuleName::DncRequest
    }

    fn schema(&self) -> &'static Value {
        &SCHEMA
    }

    fn default_violation_type(&self) -> &'static str {
        "dnc_not_honored"
    }

    fn verdict(&self, payload: &Value) -> Verdict {
        let requested = payload["customer_requested_dnc"].as_bool().unwrap_or(false);
        let honored = payload["agent_honored_request"].as_bool().unwrap_or(false);
        let has_violation = requested && !honored;

        if payload["has_violation"].as_bool().is_some_and(|flag| flag != has_violation) {
            tracing::debug!(
                reported = !has_violation,
                computed = has_violation,
                "Overriding backend violation flag for dnc_request"
            );
        }

        Verdict {
            has_violation,
            violation_type: has_violation.then(|| self.default_violation_type().to_string()),
        }
    }

    fn alerts(&self, result: &ModuleResult, ctx: &AlertContext<'_>) -> Vec<Alert> {
        let quote = result.payload["request_quote"].as_str().map(str::to_string);

        let mut alert = base_alert(result, ctx);
        alert.summary = format!(
            "Do-not-call request not honored: {}",
            payload_summary(&result.payload, "customer asked to stop calls")
        );
        if let Some(q) = &quote {
            if !alert.evidence.contains(q) {
                alert.evidence.insert(0, q.clone());
            }
        }
        alert.detail = json!({
            "customer_requested_dnc": true,
            "agent_honored_request": false,
            "request_quote": quote,
        });

        vec![alert]
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{metadata, result};
    use super::super::extract_alerts;
    use super::*;

    #[test]
    fn test_violation_recomputed_from_sub_fields() {
        // Backend claims a violation, but the agent honored the request
        let r = result(
            &DncRequestModule,
            json!({
                "has_violation": true,
                "customer_requested_dnc": true,
                "agent_honored_request": true
            }),
        );
        assert!(!r.has_violation);
        assert_eq!(r.violation_type, None);

        // Backend missed it
        let r = result(
            &DncRequestModule,
            json!({
                "has_violation": false,
                "customer_requested_dnc": true,
                "agent_honored_request": false
            }),
        );
        assert!(r.has_violation);
        assert_eq!(r.violation_type.as_deref(), Some("dnc_not_honored"));
    }

    #[test]
    fn test_no_request_no_violation() {
        let r = result(
            &DncRequestModule,
            json!({"customer_requested_dnc": false, "agent_honored_request": false}),
        );
        assert!(!r.has_violation);
    }

    #[test]
    fn test_alert_leads_with_request_quote() {
        let r = result(
            &DncRequestModule,
            json!({
                "customer_requested_dnc": true,
                "agent_honored_request": false,
                "request_quote": "Please take me off your list",
                "evidence": ["Agent: I'll call you next week"]
            }),
        );
        let meta = metadata();
        let ctx = AlertContext {
            call_id: "c",
            agent_id: "a",
            metadata: &meta,
        };
        let alerts = extract_alerts(&DncRequestModule, &r, &ctx);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].evidence[0], "Please take me off your list");
        assert_eq!(alerts[0].evidence.len(), 2);
    }
}
