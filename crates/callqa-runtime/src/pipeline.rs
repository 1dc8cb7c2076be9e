//! Concurrent per-call evaluation.
//!
//! One call fans out to every eligible module at once, each in its own task.
//! Module failures are isolated: a failing, timed-out or panicking module
//! becomes a [`ModuleError`] next to the other modules' results and never
//! aborts the run.

use futures::future::join_all;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinError;

use callqa_core::{Alert, CallEvaluationRequest, LegacyQaRecord, ModuleName, ModuleResult, SkippedModule};

use crate::alerts::AlertDispatcher;
use crate::config::BackendConfig;
use crate::registry::{ModuleCapability, ModuleEvaluationError, ModuleRegistry, RegistryError};
use crate::resilience::{RetryError, RetryExecutor, RetryPolicy};
use crate::resolver::resolve_modules;
use crate::store::{ResultStore, StorageError};

/// Failures that stop a whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not load module configs: {0}")]
    ConfigUnavailable(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Why one module produced no result.
#[derive(Error, Debug)]
pub enum ModuleFailure {
    #[error("evaluation failed: {0}")]
    Evaluation(RetryError<ModuleEvaluationError>),

    #[error("result write failed: {0}")]
    StorageWrite(StorageError),

    #[error("module task panicked: {0}")]
    Panicked(String),
}

/// A module that failed, reported alongside the successful ones.
#[derive(Debug)]
pub struct ModuleError {
    pub module_name: ModuleName,
    pub error: ModuleFailure,
}

/// Everything one call produced.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub call_id: String,
    pub results: Vec<ModuleResult>,
    pub alerts: Vec<Alert>,
    pub errors: Vec<ModuleError>,
    pub skipped: Vec<SkippedModule>,
}

impl PipelineOutcome {
    pub fn result(&self, module: ModuleName) -> Option<&ModuleResult> {
        self.results.iter().find(|r| r.module_name == module)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// One request's outcome within a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub call_id: String,
    pub outcome: Result<PipelineOutcome, PipelineError>,
}

/// Resolves, evaluates, stores and alerts for one call at a time.
#[derive(Clone)]
pub struct PipelineRunner {
    registry: Arc<ModuleRegistry>,
    store: Arc<dyn ResultStore>,
    dispatcher: Arc<AlertDispatcher>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("retry", &self.retry)
            .finish()
    }
}

impl PipelineRunner {
    /// Runner with the default backend retry policy.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        store: Arc<dyn ResultStore>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            registry,
            store,
            dispatcher,
            retry: BackendConfig::default().retry,
        }
    }

    /// Retry policy wrapped around each module's evaluation.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Evaluate one call with every eligible module.
    ///
    /// Fails only when module configs cannot be read.
    pub async fn run(&self, request: &CallEvaluationRequest) -> Result<PipelineOutcome, PipelineError> {
        let start = Instant::now();
        let resolution = resolve_modules(&self.registry, self.store.as_ref(), &request.metadata).await?;

        let mut outcome = PipelineOutcome {
            call_id: request.call_id.clone(),
            skipped: resolution.skipped,
            ..Default::default()
        };

        if resolution.eligible.is_empty() {
            tracing::info!(call_id = %request.call_id, "No eligible modules for call");
            return Ok(outcome);
        }

        let capabilities = resolution
            .eligible
            .iter()
            .map(|name| self.registry.get(*name))
            .collect::<Result<Vec<_>, _>>()?;

        let request = Arc::new(request.clone());
        let handles: Vec<_> = capabilities
            .into_iter()
            .map(|capability| {
                let name = capability.name();
                let task = evaluate_module(
                    capability,
                    Arc::clone(&self.store),
                    self.retry.clone(),
                    Arc::clone(&request),
                );
                (name, tokio::spawn(task))
            })
            .collect();

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        for (module_name, joined) in names.into_iter().zip(joined) {
            match joined.map_err(panic_failure).and_then(|r| r) {
                Ok((result, alerts)) => {
                    outcome.results.push(result);
                    outcome.alerts.extend(alerts);
                }
                Err(error) => {
                    tracing::warn!(
                        call_id = %request.call_id,
                        module = %module_name,
                        error = %error,
                        "Module failed"
                    );
                    outcome.errors.push(ModuleError { module_name, error });
                }
            }
        }

        if !outcome.alerts.is_empty() {
            drop(self.dispatcher.dispatch(outcome.alerts.clone()));
        }

        tracing::info!(
            call_id = %request.call_id,
            results = outcome.results.len(),
            errors = outcome.errors.len(),
            skipped = outcome.skipped.len(),
            alerts = outcome.alerts.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Call evaluated"
        );

        Ok(outcome)
    }

    /// Evaluate many calls concurrently; one call failing never stops the rest.
    pub async fn run_batch(&self, requests: &[CallEvaluationRequest]) -> Vec<BatchItem> {
        let outcomes = join_all(requests.iter().map(|request| self.run(request))).await;

        requests
            .iter()
            .zip(outcomes)
            .map(|(request, outcome)| {
                if let Err(e) = &outcome {
                    tracing::error!(call_id = %request.call_id, error = %e, "Call could not be evaluated");
                }
                BatchItem {
                    call_id: request.call_id.clone(),
                    outcome,
                }
            })
            .collect()
    }
}

async fn evaluate_module(
    capability: Arc<dyn ModuleCapability>,
    store: Arc<dyn ResultStore>,
    retry: RetryPolicy,
    request: Arc<CallEvaluationRequest>,
) -> Result<(ModuleResult, Vec<Alert>), ModuleFailure> {
    let label = format!("{}:{}", request.call_id, capability.name());

    let result = RetryExecutor::new(retry)
        .execute(&label, || capability.evaluate(&request.transcript, &request.metadata))
        .await
        .map_err(ModuleFailure::Evaluation)?;

    store
        .upsert_module_result(&request.call_id, &result)
        .await
        .map_err(ModuleFailure::StorageWrite)?;

    if let Some(record) = LegacyQaRecord::from_result(&result, &request.call_id, &request.agent_id) {
        if let Err(e) = store.upsert_legacy_qa_result(&record).await {
            tracing::warn!(call_id = %request.call_id, error = %e, "Legacy QA mirror write failed");
        }
    }

    let alerts = if result.has_violation {
        capability.extract_alerts(&result, &request.call_id, &request.agent_id, &request.metadata)
    } else {
        Vec::new()
    };

    Ok((result, alerts))
}

fn panic_failure(err: JoinError) -> ModuleFailure {
    if !err.is_panic() {
        return ModuleFailure::Panicked(err.to_string());
    }

    ModuleFailure::Panicked(panic_message(err.into_panic().as_ref()))
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
