//! Persisted workflow instance state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use callqa_core::{CallEvaluationRequest, ModuleName};

use super::steps::StepName;

/// Input of one instance: a call and the module evaluating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParams {
    pub request: CallEvaluationRequest,
    pub module: ModuleName,
}

impl WorkflowParams {
    pub fn new(request: CallEvaluationRequest, module: ModuleName) -> Self {
        Self { request, module }
    }

    /// `{call_id}-{module_name}`
    pub fn instance_id(&self) -> String {
        self.request.instance_id(self.module)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Complete { output: Value },
    Errored { error: String },
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }

    pub fn kind(&self) -> StatusKind {
        match self {
            InstanceStatus::Running => StatusKind::Running,
            InstanceStatus::Complete { .. } => StatusKind::Complete,
            InstanceStatus::Errored { .. } => StatusKind::Errored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Running,
    Complete,
    Errored,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusKind::Running => "running",
            StatusKind::Complete => "complete",
            StatusKind::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// A completed step's durable output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: StepName,
    pub output: Value,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

/// Everything persisted for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub params: WorkflowParams,
    #[serde(flatten)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(id: impl Into<String>, params: WorkflowParams) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            params,
            status: InstanceStatus::Running,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_output(&self, name: StepName) -> Option<&Value> {
        self.steps.iter().find(|s| s.name == name).map(|s| &s.output)
    }

    pub fn is_complete(&self, name: StepName) -> bool {
        self.step_output(name).is_some()
    }

    pub fn record_step(&mut self, name: StepName, output: Value, attempts: u32) {
        let now = Utc::now();
        self.steps.push(StepRecord {
            name,
            output,
            attempts,
            completed_at: now,
        });
        self.updated_at = now;
    }

    pub fn finish(&mut self, status: InstanceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let (output, error) = match &self.status {
            InstanceStatus::Running => (None, None),
            InstanceStatus::Complete { output } => (Some(output.clone()), None),
            InstanceStatus::Errored { error } => (None, Some(error.clone())),
        };
        StatusSnapshot {
            status: self.status.kind(),
            output,
            error,
        }
    }
}

/// What a status poll sees. `running` means try again later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
