//! The fixed step sequence and its bodies.
//!
//! A step is a function of the instance params and the persisted outputs of
//! earlier steps. It never reads in-memory state from a previous attempt, so
//! any step can run in a fresh process after a restart.

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use callqa_core::{Alert, LegacyQaRecord, ModuleResult};

use super::state::InstanceRecord;
use crate::alerts::{AlertDispatcher, DispatchSummary};
use crate::registry::ModuleRegistry;
use crate::resilience::RetryPolicy;
use crate::store::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    Evaluate,
    StoreResult,
    DispatchAlerts,
    LogCompletion,
}

impl StepName {
    /// Execution order.
    pub const SEQUENCE: [StepName; 4] = [
        StepName::Evaluate,
        StepName::StoreResult,
        StepName::DispatchAlerts,
        StepName::LogCompletion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Evaluate => "evaluate",
            StepName::StoreResult => "store-result",
            StepName::DispatchAlerts => "dispatch-alerts",
            StepName::LogCompletion => "log-completion",
        }
    }

    /// Exhausting this step's retries does not fail the instance.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, StepName::DispatchAlerts)
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy per step. `attempt_timeout` is the step timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPolicies {
    #[serde(default = "default_evaluate")]
    pub evaluate: RetryPolicy,

    #[serde(default = "default_store_result")]
    pub store_result: RetryPolicy,

    #[serde(default = "default_dispatch_alerts")]
    pub dispatch_alerts: RetryPolicy,

    #[serde(default = "default_log_completion")]
    pub log_completion: RetryPolicy,
}

fn default_evaluate() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_secs(5)).with_attempt_timeout(Duration::from_secs(300))
}

fn default_store_result() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_secs(2)).with_attempt_timeout(Duration::from_secs(60))
}

fn default_dispatch_alerts() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_secs(3)).with_attempt_timeout(Duration::from_secs(60))
}

fn default_log_completion() -> RetryPolicy {
    RetryPolicy::constant(2, Duration::from_secs(1)).with_attempt_timeout(Duration::from_secs(30))
}

impl Default for StepPolicies {
    fn default() -> Self {
        Self {
            evaluate: default_evaluate(),
            store_result: default_store_result(),
            dispatch_alerts: default_dispatch_alerts(),
            log_completion: default_log_completion(),
        }
    }
}

impl StepPolicies {
    pub fn for_step(&self, step: StepName) -> &RetryPolicy {
        match step {
            StepName::Evaluate => &self.evaluate,
            StepName::StoreResult => &self.store_result,
            StepName::DispatchAlerts => &self.dispatch_alerts,
            StepName::LogCompletion => &self.log_completion,
        }
    }
}

/// Some alerts were not delivered on this attempt.
#[derive(Debug, thiserror::Error)]
#[error("{failed} alert(s) not delivered, {delivered} delivered")]
pub struct DispatchIncomplete {
    pub delivered: usize,
    pub failed: usize,
}

/// What step bodies need from the outside world.
#[derive(Clone)]
pub(crate) struct StepContext {
    pub registry: Arc<ModuleRegistry>,
    pub results: Arc<dyn ResultStore>,
    pub dispatcher: Arc<AlertDispatcher>,
}

/// Alerts already delivered by earlier attempts of one dispatch-alerts run.
///
/// A retry resends only the alerts still marked undelivered.
#[derive(Debug, Default)]
pub(crate) struct DeliveryLog {
    delivered: Mutex<Vec<bool>>,
}

/// Run one attempt of `step`.
pub(crate) async fn run_step(
    ctx: &StepContext,
    step: StepName,
    record: &InstanceRecord,
    deliveries: &DeliveryLog,
) -> anyhow::Result<Value> {
    match step {
        StepName::Evaluate => evaluate(ctx, record).await,
        StepName::StoreResult => store_result(ctx, record).await,
        StepName::DispatchAlerts => dispatch_alerts(ctx, record, deliveries).await,
        StepName::LogCompletion => log_completion(record),
    }
}

/// Output recorded when a best-effort step exhausts its retries.
pub(crate) fn best_effort_output(step: StepName, record: &InstanceRecord, error: &anyhow::Error) -> Value {
    let summary = error
        .downcast_ref::<DispatchIncomplete>()
        .map(|e| DispatchSummary {
            delivered: e.delivered,
            failed: e.failed,
        })
        .unwrap_or_else(|| DispatchSummary {
            delivered: 0,
            failed: stored_alerts(record).map(|a| a.len()).unwrap_or(0),
        });

    json!({
        "step": step.as_str(),
        "delivered": summary.delivered,
        "failed": summary.failed,
        "error": format!("{:#}", error),
    })
}

async fn evaluate(ctx: &StepContext, record: &InstanceRecord) -> anyhow::Result<Value> {
    let params = &record.params;
    let capability = ctx.registry.get(params.module)?;

    let result = capability
        .evaluate(&params.request.transcript, &params.request.metadata)
        .await
        .with_context(|| format!("{} evaluation failed", params.module))?;

    Ok(serde_json::to_value(result)?)
}

fn evaluated_result(record: &InstanceRecord) -> anyhow::Result<ModuleResult> {
    let output = record
        .step_output(StepName::Evaluate)
        .ok_or_else(|| anyhow!("evaluate output missing"))?;
    serde_json::from_value(output.clone()).context("evaluate output is not a module result")
}

fn stored_alerts(record: &InstanceRecord) -> anyhow::Result<Vec<Alert>> {
    let output = record
        .step_output(StepName::StoreResult)
        .ok_or_else(|| anyhow!("store-result output missing"))?;
    serde_json::from_value(output["alerts"].clone()).context("store-result output has no alert list")
}

async fn store_result(ctx: &StepContext, record: &InstanceRecord) -> anyhow::Result<Value> {
    let request = &record.params.request;
    let result = evaluated_result(record)?;

    ctx.results
        .upsert_module_result(&request.call_id, &result)
        .await
        .context("primary result write failed")?;

    if let Some(legacy) = LegacyQaRecord::from_result(&result, &request.call_id, &request.agent_id) {
        if let Err(e) = ctx.results.upsert_legacy_qa_result(&legacy).await {
            tracing::warn!(call_id = %request.call_id, error = %e, "Legacy QA mirror write failed");
        }
    }

    let alerts = ctx
        .registry
        .alerts_for(&result, &request.call_id, &request.agent_id, &request.metadata)?;

    Ok(json!({
        "stored": true,
        "has_violation": result.has_violation,
        "alerts": alerts,
    }))
}

async fn dispatch_alerts(
    ctx: &StepContext,
    record: &InstanceRecord,
    deliveries: &DeliveryLog,
) -> anyhow::Result<Value> {
    let alerts = stored_alerts(record)?;
    let mut delivered = deliveries.delivered.lock().clone();
    delivered.resize(alerts.len(), false);

    let summary = ctx.dispatcher.deliver_remaining(&alerts, &mut delivered).await;
    *deliveries.delivered.lock() = delivered;

    if summary.failed > 0 {
        return Err(DispatchIncomplete {
            delivered: summary.delivered,
            failed: summary.failed,
        }
        .into());
    }
    Ok(serde_json::to_value(summary)?)
}

fn log_completion(record: &InstanceRecord) -> anyhow::Result<Value> {
    let result = evaluated_result(record)?;
    let dispatch = record.step_output(StepName::DispatchAlerts).cloned().unwrap_or(Value::Null);
    let alerts = stored_alerts(record)?.len();

    tracing::info!(
        instance = %record.id,
        call_id = %record.params.request.call_id,
        module = %record.params.module,
        has_violation = result.has_violation,
        alerts,
        "Workflow finished"
    );

    Ok(json!({
        "call_id": record.params.request.call_id,
        "module_name": result.module_name,
        "has_violation": result.has_violation,
        "violation_type": result.violation_type,
        "alerts": alerts,
        "dispatch": dispatch,
        "result": result.payload,
    }))
}
