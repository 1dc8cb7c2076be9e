//! Prohibited language module.

use lazy_static::lazy_static;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::types::{Alert, AlertContext, ModuleName, ModuleResult};

use super::{base_alert, payload_summary, ModuleSpec};

lazy_static! {
    static ref SCHEMA: Value = json!({
        "type": "object",
        "required": ["has_violation", "phrases"],
        "properties": {
            "has_violation": { "type": "boolean" },
            "violation_type": { "type": ["string", "null"] },
            "phrases": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["quote", "category"],
                    "properties": {
                        "quote": { "type": "string" },
                        "category": { "type": "string" }
                    }
                }
            },
            "evidence": { "type": "array", "items": { "type": "string" } },
            "summary": { "type": "string" }
        }
    });
}

/// Flags profanity, misrepresentation and similar banned language.
pub struct ProhibitedLanguageModule;

impl ModuleSpec for ProhibitedLanguageModule {
    fn name(&self) -> ModuleName {
        ModuleName::ProhibitedLanguage
    }

    fn schema(&self) -> &'static Value {
        &SCHEMA
    }

    fn default_violation_type(&self) -> &'static str {
        "prohibited_language"
    }

    /// Phrases are grouped by category, one alert per category.
    fn alerts(&self, result: &ModuleResult, ctx: &AlertContext<'_>) -> Vec<Alert> {
        let mut by_category: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(phrases) = result.payload["phrases"].as_array() {
            for phrase in phrases {
                let (Some(quote), Some(category)) =
                    (phrase["quote"].as_str(), phrase["category"].as_str())
                else {
                    continue;
                };
                by_category
                    .entry(category.to_string())
                    .or_default()
                    .push(quote.to_string());
            }
        }

        if by_category.is_empty() {
            let mut alert = base_alert(result, ctx);
            alert.summary = format!(
                "Prohibited language: {}",
                payload_summary(&result.payload, "flagged by evaluation")
            );
            return vec![alert];
        }

        by_category
            .into_iter()
            .map(|(category, quotes)| {
                let mut alert = base_alert(result, ctx);
                alert.summary = format!(
                    "Prohibited language ({}): {} occurrence(s)",
                    category,
                    quotes.len()
                );
                alert.detail = json!({ "category": category, "count": quotes.len() });
                alert.evidence = quotes;
                alert
            })
            .collect()
    }
}
