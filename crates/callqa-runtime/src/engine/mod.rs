//! Durable per-module workflows.
//!
//! Each `(call_id, module_name)` pair gets one instance that walks the fixed
//! [`StepName::SEQUENCE`]. Every step retries under its own policy and its
//! output is saved before the next step starts. A restarted process picks up
//! running instances with [`WorkflowEngine::resume`] and continues at the
//! first step without a saved output.
//!
//! Instances for different modules of the same call are independent tasks.

mod state;
mod steps;
mod store;

pub use state::{InstanceRecord, InstanceStatus, StatusKind, StatusSnapshot, StepRecord, WorkflowParams};
pub use steps::{DispatchIncomplete, StepName, StepPolicies};
pub use store::{FileInstanceStore, InstanceStore, InstanceStoreError, MemoryInstanceStore};

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use callqa_core::{CallEvaluationRequest, ModuleName, SkippedModule};

use crate::alerts::AlertDispatcher;
use crate::pipeline::panic_message;
use crate::registry::{ModuleRegistry, RegistryError};
use crate::resilience::{RetryError, RetryExecutor};
use crate::resolver::resolve_modules;
use crate::store::{ResultStore, StorageError};
use steps::{DeliveryLog, StepContext};

#[derive(Error, Debug)]
pub enum EngineError {
    /// Another create already claimed this id
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] InstanceStoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("could not load module configs: {0}")]
    ConfigUnavailable(#[from] StorageError),
}

/// Handle for polling one instance.
#[derive(Clone)]
pub struct WorkflowInstance {
    id: String,
    store: Arc<dyn InstanceStore>,
}

impl std::fmt::Debug for WorkflowInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowInstance").field("id", &self.id).finish()
    }
}

impl WorkflowInstance {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current status, read from the store.
    pub async fn status(&self) -> Result<StatusSnapshot, EngineError> {
        self.store
            .load(&self.id)
            .await?
            .map(|record| record.snapshot())
            .ok_or_else(|| EngineError::NotFound(self.id.clone()))
    }

    /// Poll every `interval` until terminal or until `max_wait` passes.
    ///
    /// Returns the last snapshot seen, which is still `running` on timeout.
    pub async fn wait(&self, interval: Duration, max_wait: Duration) -> Result<StatusSnapshot, EngineError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let snapshot = self.status().await?;
            if snapshot.status != StatusKind::Running || tokio::time::Instant::now() >= deadline {
                return Ok(snapshot);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerFailure {
    pub module_name: ModuleName,
    pub error: String,
}

/// Per-module outcome of triggering one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub call_id: String,
    pub queued: Vec<ModuleName>,
    pub already_queued: Vec<ModuleName>,
    pub skipped: Vec<SkippedModule>,
    pub failed: Vec<TriggerFailure>,
}

/// Creates and drives workflow instances.
#[derive(Clone)]
pub struct WorkflowEngine {
    instances: Arc<dyn InstanceStore>,
    ctx: StepContext,
    policies: StepPolicies,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("policies", &self.policies)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl WorkflowEngine {
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        registry: Arc<ModuleRegistry>,
        results: Arc<dyn ResultStore>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            instances,
            ctx: StepContext {
                registry,
                results,
                dispatcher,
            },
            policies: StepPolicies::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_policies(mut self, policies: StepPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Create an instance and start driving it in the background.
    ///
    /// Fails with [`EngineError::AlreadyExists`] if `id` was ever created;
    /// the existing instance is left untouched.
    pub async fn create(&self, id: &str, params: WorkflowParams) -> Result<WorkflowInstance, EngineError> {
        self.ctx.registry.get(params.module)?;

        let record = InstanceRecord::new(id, params);
        if !self.instances.insert_if_absent(&record).await? {
            tracing::debug!(instance = id, "Instance already exists");
            return Err(EngineError::AlreadyExists(id.to_string()));
        }

        tracing::info!(instance = id, module = %record.params.module, "Workflow created");
        self.spawn_driver(id.to_string());
        Ok(self.handle(id))
    }

    pub async fn get(&self, id: &str) -> Result<WorkflowInstance, EngineError> {
        match self.instances.load(id).await? {
            Some(_) => Ok(self.handle(id)),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    /// Re-drive every running instance. Returns how many were started.
    pub async fn resume(&self) -> Result<usize, EngineError> {
        let running = self.instances.list_running().await?;
        let started = running
            .into_iter()
            .filter(|record| self.spawn_driver(record.id.clone()).is_some())
            .count();

        if started > 0 {
            tracing::info!(instances = started, "Resumed running workflows");
        }
        Ok(started)
    }

    /// Create one instance per eligible module of a call.
    pub async fn trigger(&self, request: &CallEvaluationRequest) -> Result<TriggerReport, EngineError> {
        let resolution =
            resolve_modules(&self.ctx.registry, self.ctx.results.as_ref(), &request.metadata).await?;

        let mut report = TriggerReport {
            call_id: request.call_id.clone(),
            skipped: resolution.skipped,
            ..Default::default()
        };

        for module in resolution.eligible {
            let params = WorkflowParams::new(request.clone(), module);
            match self.create(&params.instance_id(), params).await {
                Ok(_) => report.queued.push(module),
                Err(EngineError::AlreadyExists(_)) => report.already_queued.push(module),
                Err(e) => {
                    tracing::warn!(call_id = %request.call_id, module = %module, error = %e, "Could not create workflow");
                    report.failed.push(TriggerFailure {
                        module_name: module,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Trigger many calls; one failing never stops the rest.
    pub async fn trigger_batch(
        &self,
        requests: &[CallEvaluationRequest],
    ) -> Vec<(String, Result<TriggerReport, EngineError>)> {
        let reports = join_all(requests.iter().map(|request| self.trigger(request))).await;
        requests
            .iter()
            .map(|r| r.call_id.clone())
            .zip(reports)
            .collect()
    }

    fn handle(&self, id: &str) -> WorkflowInstance {
        WorkflowInstance {
            id: id.to_string(),
            store: Arc::clone(&self.instances),
        }
    }

    /// Start a driver unless one is already running for `id` in this process.
    fn spawn_driver(&self, id: String) -> Option<JoinHandle<()>> {
        if !self.in_flight.lock().insert(id.clone()) {
            return None;
        }

        let guard = InFlight {
            ids: Arc::clone(&self.in_flight),
            id,
        };
        let engine = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = engine.drive(&guard.id).await {
                tracing::error!(instance = %guard.id, error = %e, "Workflow driver stopped; instance left running");
            }
            drop(guard);
        }))
    }

    /// Run every step without a saved output, in order.
    async fn drive(&self, id: &str) -> Result<(), EngineError> {
        let mut record = self
            .instances
            .load(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        if record.status.is_terminal() {
            return Ok(());
        }

        for step in StepName::SEQUENCE {
            if record.is_complete(step) {
                tracing::debug!(instance = id, step = %step, "Step already complete");
                continue;
            }

            let attempts = AtomicU32::new(0);
            let deliveries = DeliveryLog::default();
            let label = format!("{}:{}", id, step);
            let executor = RetryExecutor::new(self.policies.for_step(step).clone());
            let run = executor.execute(&label, || {
                attempts.fetch_add(1, Ordering::Relaxed);
                steps::run_step(&self.ctx, step, &record, &deliveries)
            });

            let caught = AssertUnwindSafe(run).catch_unwind().await;
            let outcome = match caught {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let error = format!("{} panicked: {}", step, panic_message(panic.as_ref()));
                    tracing::error!(instance = id, step = %step, error = %error, "Workflow errored");
                    record.finish(InstanceStatus::Errored { error });
                    self.instances.save(&record).await?;
                    return Ok(());
                }
            };
            let attempts = attempts.into_inner();

            match outcome {
                Ok(output) => record.record_step(step, output, attempts),
                Err(err) if step.is_best_effort() => {
                    tracing::warn!(instance = id, step = %step, error = %format!("{:#}", err.last_error()), "Best-effort step gave up");
                    let output = steps::best_effort_output(step, &record, err.last_error());
                    record.record_step(step, output, attempts);
                }
                Err(err) => {
                    let error = failure_cause(step, attempts, err);
                    tracing::error!(instance = id, step = %step, error = %error, "Workflow errored");
                    record.finish(InstanceStatus::Errored { error });
                    self.instances.save(&record).await?;
                    return Ok(());
                }
            }

            self.instances.save(&record).await?;
        }

        let output = record
            .step_output(StepName::LogCompletion)
            .cloned()
            .unwrap_or_default();
        record.finish(InstanceStatus::Complete { output });
        self.instances.save(&record).await?;
        Ok(())
    }
}

/// Frees an id in the in-flight set when its driver ends, even by unwinding.
struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.id);
    }
}

fn failure_cause(step: StepName, attempts: u32, err: RetryError<anyhow::Error>) -> String {
    match err {
        RetryError::Exhausted(last) => {
            format!("{} failed after {} attempt(s): {:#}", step, attempts, last)
        }
        RetryError::TimeoutExceeded { last, elapsed, .. } => {
            format!("{} timed out after {:?} and {} attempt(s): {:#}", step, elapsed, attempts, last)
        }
    }
}
