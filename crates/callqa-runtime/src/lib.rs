//! # callqa-runtime
//!
//! Async execution for call QA: the evaluation backend, concurrent per-call
//! pipeline, durable per-module workflows and alert dispatch.
//!
//! Everything deterministic (gating, schemas, verdicts, alert shapes) lives
//! in `callqa-core`. This crate adds I/O around it.
//!
//! ## Two ways to run a call
//!
//! - [`PipelineRunner::run`] evaluates every eligible module concurrently and
//!   returns results, alerts and per-module errors in one response.
//! - [`WorkflowEngine::trigger`] creates one durable instance per eligible
//!   module. Instances survive restarts and are polled by id.
//!
//! ## Example
//!
//! ```rust,ignore
//! use callqa_runtime::{CallQaService, MemoryResultStore, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("callqa.yaml")?.with_env_overrides();
//! let service = CallQaService::connect(&config, Arc::new(MemoryResultStore::new())).await?;
//! service.engine.resume().await?;
//!
//! let outcome = service.pipeline.run(&request).await?;
//! for error in &outcome.errors {
//!     eprintln!("{}: {}", error.module_name, error.error);
//! }
//! ```

pub mod alerts;
pub mod backend;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod registry;
pub mod resilience;
pub mod resolver;
pub mod service;
pub mod store;

pub use alerts::{AlertDispatchError, AlertDispatcher, DispatchSummary, NotificationPayload, NotificationSink};
pub use backend::{BackendError, EvaluationBackend};
pub use config::{RuntimeConfig, RuntimeConfigError};
pub use engine::{
    EngineError, FileInstanceStore, InstanceStore, MemoryInstanceStore, StatusKind, StatusSnapshot, StepName,
    StepPolicies, TriggerReport, WorkflowEngine, WorkflowInstance, WorkflowParams,
};
pub use pipeline::{ModuleError, ModuleFailure, PipelineError, PipelineOutcome, PipelineRunner};
pub use providers::{LlmProvider, ProviderError};
pub use registry::{ModuleCapability, ModuleEvaluationError, ModuleRegistry, RegistryError};
pub use resilience::{RetryError, RetryExecutor, RetryPolicy};
pub use resolver::resolve_modules;
pub use service::{CallQaService, RuntimeError};
pub use store::{MemoryResultStore, ResultStore, StorageError};
