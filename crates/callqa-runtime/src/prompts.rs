//! System and user prompts for evaluation modules.
//!
//! Prompts are laid out for prompt caching:
//! 1. Base prompt (shared across all modules) - cached
//! 2. Module prompt - cached
//! 3. Transcript and call data - not cached
//!
//! Compliance criteria themselves are owned by whoever deploys the
//! modules; these prompts fix the reviewer framing and output contract.

use callqa_core::{CallMetadata, ModuleName};

/// Base system prompt shared across all modules.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are a compliance reviewer for recorded sales calls.

You review one transcript against one checklist and report what you find.
You do not score anything the checklist does not ask about.
You quote the transcript for every finding.

## Review Constraints
1. Judge ONLY the checklist you are given
2. Every finding must quote the transcript verbatim in "evidence"
3. If the transcript does not show a violation, report none
4. Respond with a single JSON object and nothing else

## Output Rules
- "has_violation" is a boolean
- "violation_type" is a short snake_case label, or null
- "evidence" is a list of exact transcript quotes
- "summary" is one or two sentences for a supervisor
"#;

/// Full QA scorecard prompt.
pub const FULL_QA_PROMPT: &str = r#"
## Checklist: Full QA Scorecard

Score the whole call from 0 to 100 and list any auto-fail criteria the agent hit.

Required fields:
- "overall_score": number 0-100
- "auto_fail_reasons": list of strings, empty when none apply
- "category_scores": object of category name to number
- "has_violation": true when any auto-fail reason applies
"#;

/// Required disclosures prompt.
pub const DISCLOSURE_PROMPT: &str = r#"
## Checklist: Required Disclosures

Check that the agent gave every required disclosure, including the call
recording notice.

Required fields:
- "recording_disclosure_given": boolean
- "missing_disclosures": list of the disclosures not given, empty when none
- "has_violation": true when any disclosure is missing
"#;

/// Do-not-call request prompt.
pub const DNC_REQUEST_PROMPT: &str = r#"
## Checklist: Do-Not-Call Requests

Determine whether the customer asked not to be called again, and whether
the agent acknowledged and honored that request.

Required fields:
- "customer_requested_dnc": boolean
- "agent_honored_request": boolean, true when no request was made
- "request_quote": the customer's exact words, or null
"#;

/// Prohibited language prompt.
pub const PROHIBITED_LANGUAGE_PROMPT: &str = r#"
## Checklist: Prohibited Language

Find profanity, misrepresentation of the product, guarantees of outcome,
and any other language the agent must never use.

Required fields:
- "phrases": list of {"quote": exact words, "category": snake_case label}
- "has_violation": true when "phrases" is not empty
"#;

/// Module-specific prompt.
pub fn module_prompt(module: ModuleName) -> &'static str {
    match module {
        ModuleName::FullQa => FULL_QA_PROMPT,
        ModuleName::Disclosure => DISCLOSURE_PROMPT,
        ModuleName::DncRequest => DNC_REQUEST_PROMPT,
        ModuleName::ProhibitedLanguage => PROHIBITED_LANGUAGE_PROMPT,
    }
}

/// Full system prompt for a module: base framing then checklist.
pub fn system_prompt(module: ModuleName) -> String {
    format!("{}\n{}", BASE_SYSTEM_PROMPT.trim(), module_prompt(module).trim())
}

/// User prompt carrying call context and the transcript.
pub fn user_prompt(transcript: &str, call_data: &CallMetadata) -> String {
    let mut prompt = String::from("## Call\n");
    prompt.push_str(&format!("- Duration: {}s\n", call_data.duration));
    if let Some(talk_time) = call_data.talk_time {
        prompt.push_str(&format!("- Talk time: {}s\n", talk_time));
    }
    if let Some(disposition) = &call_data.disposition {
        prompt.push_str(&format!("- Disposition: {}\n", disposition));
    }
    if let Some(campaign) = &call_data.campaign {
        prompt.push_str(&format!("- Campaign: {}\n", campaign));
    }
    prompt.push_str("\n## Transcript\n");
    prompt.push_str(transcript.trim());
    prompt.push('\n');
    prompt
}
