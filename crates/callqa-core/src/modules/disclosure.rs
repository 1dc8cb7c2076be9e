//! Required disclosures module.

use lazy_static::lazy_static;
use serde_json::{json, Value};

use crate::types::{Alert, AlertContext, ModuleName, ModuleResult};

use super::{base_alert, payload_summary, string_list, ModuleSpec};

lazy_static! {
    static ref SCHEMA: Value = json!({
        "type": "object",
        "required": ["has_violation", "missing_disclosures"],
        "properties": {
            "has_violation": { "type": "boolean" },
            "violation_type": { "type": ["string", "null"] },
            "recording_disclosure_given": { "type": "boolean" },
            "missing_disclosures": { "type": "array", "items": { "type": "string" } },
            "evidence": { "type": "array", "items": { "type": "string" } },
            "summary": { "type": "string" }
        }
    });
}

/// Checks the agent gave every required disclosure.
pub struct DisclosureModule;

impl ModuleSpec for DisclosureModule {
    fn name(&self) -> ModuleName {
        ModuleName::Disclosure
    }

    fn schema(&self) -> &'static Value {
        &SCHEMA
    }

    fn default_violation_type(&self) -> &'static str {
        "missing_disclosure"
    }

    /// One alert per missing disclosure; a single generic alert if the
    /// backend flagged a violation without listing any.
    fn alerts(&self, result: &ModuleResult, ctx: &AlertContext<'_>) -> Vec<Alert> {
        let missing = string_list(&result.payload, "missing_disclosures");

        if missing.is_empty() {
            let mut alert = base_alert(result, ctx);
            alert.summary = format!(
                "Disclosure violation: {}",
                payload_summary(&result.payload, "required disclosure not given")
            );
            alert.detail = json!({ "missing_disclosures": [] });
            return vec![alert];
        }

        missing
            .into_iter()
            .map(|disclosure| {
                let mut alert = base_alert(result, ctx);
                alert.summary = format!("Missing required disclosure: {}", disclosure);
                alert.detail = json!({
                    "missing_disclosure": disclosure,
                    "recording_disclosure_given": result.payload["recording_disclosure_given"].clone(),
                });
                alert
            })
            .collect()
    }
}
