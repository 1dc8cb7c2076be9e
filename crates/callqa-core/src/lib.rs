//! # callqa-core
//!
//! Deterministic building blocks for evaluating recorded sales calls.
//!
//! This crate answers, without any I/O:
//! - Which evaluation modules apply to this call?
//! - Is this backend payload well-formed for its module?
//! - Does the result represent a violation, and what alerts follow?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No backend calls**: The evaluation backend is driven by `callqa-runtime`
//! 3. **Alerts only from violations**: A non-violating result yields no alerts
//!
//! ## Example
//!
//! ```rust,ignore
//! use callqa_core::{modules, recovery, trigger, ModuleConfigs, ModuleName};
//!
//! let configs = ModuleConfigs::from_yaml_file("modules.yaml")?;
//! let plan = trigger::resolve(ModuleName::ALL, &configs, &request.metadata);
//!
//! for module in plan.eligible {
//!     let spec = modules::spec_for(module);
//!     let payload = recovery::recover_json(&backend_text)?;
//!     let result = modules::build_result(spec, payload, elapsed_ms)?;
//!     let alerts = modules::extract_alerts(spec, &result, &AlertContext::from_request(&request));
//! }
//! ```

pub mod config;
pub mod evidence;
pub mod modules;
pub mod recovery;
pub mod schema;
pub mod trigger;
pub mod types;

// Re-export main types at crate root
pub use config::{ConfigError, ModuleConfig, ModuleConfigs};
pub use evidence::{check_quotes, QuoteCheck};
pub use modules::{
    assemble, build_result, extract_alerts, spec_for, DisclosureModule, DncRequestModule, FullQaModule,
    LegacyQaRecord, ModuleSpec, ProhibitedLanguageModule, Verdict,
};
pub use recovery::{recover_json, RecoveryFailed};
pub use schema::{validate_payload, SchemaError};
pub use trigger::{Resolution, SkipReason, SkippedModule};
pub use types::{
    Alert, AlertContext, CallEvaluationRequest, CallMetadata, ModuleName, ModuleResult,
    UnknownModuleName,
};
