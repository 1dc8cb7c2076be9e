//! Module registry.
//!
//! An immutable map from [`ModuleName`] to the capability that evaluates it.
//! Built once at startup and shared behind `Arc`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use callqa_core::{
    assemble, check_quotes, extract_alerts, modules::string_list, spec_for, Alert, AlertContext,
    CallMetadata, ModuleName, ModuleResult, ModuleSpec,
};

use crate::backend::{BackendError, EvaluationBackend};
use crate::prompts;
use crate::resilience::AttemptTimedOut;

/// Errors from registry lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown module: {0}")]
    UnknownModule(ModuleName),
}

/// Why one module could not evaluate a call.
#[derive(Error, Debug)]
pub enum ModuleEvaluationError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    TimedOut(#[from] AttemptTimedOut),

    #[error("{0}")]
    Other(String),
}

/// What a registered module can do.
#[async_trait]
pub trait ModuleCapability: Send + Sync {
    fn name(&self) -> ModuleName;

    /// Evaluate a transcript. One attempt; callers own retries.
    async fn evaluate(
        &self,
        transcript: &str,
        call_data: &CallMetadata,
    ) -> Result<ModuleResult, ModuleEvaluationError>;

    /// Alerts for a violating result. Only called when `has_violation` is set.
    fn extract_alerts(
        &self,
        result: &ModuleResult,
        call_id: &str,
        agent_id: &str,
        call_data: &CallMetadata,
    ) -> Vec<Alert>;
}

/// A module evaluated by the LLM backend.
pub struct LlmModule {
    spec: &'static dyn ModuleSpec,
    backend: Arc<EvaluationBackend>,
    system_prompt: String,
}

impl LlmModule {
    pub fn new(name: ModuleName, backend: Arc<EvaluationBackend>) -> Self {
        Self {
            spec: spec_for(name),
            backend,
            system_prompt: prompts::system_prompt(name),
        }
    }
}

#[async_trait]
impl ModuleCapability for LlmModule {
    fn name(&self) -> ModuleName {
        self.spec.name()
    }

    async fn evaluate(
        &self,
        transcript: &str,
        call_data: &CallMetadata,
    ) -> Result<ModuleResult, ModuleEvaluationError> {
        let started = Instant::now();
        let user_prompt = prompts::user_prompt(transcript, call_data);

        let payload = self
            .backend
            .evaluate_value(&self.system_prompt, &user_prompt, self.spec.schema(), self.spec.schema_tag())
            .await?;

        let quotes = check_quotes(transcript, string_list(&payload, "evidence"));
        if !quotes.all_verified() {
            tracing::warn!(
                module = %self.spec.name(),
                unverified = quotes.unverified.len(),
                verified = quotes.verified.len(),
                "Evidence quotes not found in transcript"
            );
        }

        Ok(assemble(self.spec, payload, started.elapsed().as_millis() as u64))
    }

    fn extract_alerts(
        &self,
        result: &ModuleResult,
        call_id: &str,
        agent_id: &str,
        call_data: &CallMetadata,
    ) -> Vec<Alert> {
        let ctx = AlertContext {
            call_id,
            agent_id,
            metadata: call_data,
        };
        extract_alerts(self.spec, result, &ctx)
    }
}

/// Immutable module map.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleName, Arc<dyn ModuleCapability>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry").field("modules", &self.names()).finish()
    }
}

impl ModuleRegistry {
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::default()
    }

    /// Every module, evaluated by `backend`.
    pub fn with_backend(backend: Arc<EvaluationBackend>) -> Self {
        ModuleName::ALL
            .into_iter()
            .fold(Self::builder(), |builder, name| {
                builder.register(Arc::new(LlmModule::new(name, Arc::clone(&backend))))
            })
            .build()
    }

    pub fn get(&self, name: ModuleName) -> Result<Arc<dyn ModuleCapability>, RegistryError> {
        self.modules
            .get(&name)
            .cloned()
            .ok_or(RegistryError::UnknownModule(name))
    }

    /// Registered module names, in declaration order.
    pub fn names(&self) -> Vec<ModuleName> {
        self.modules.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Alerts for a result; none unless it is a violation.
    pub fn alerts_for(
        &self,
        result: &ModuleResult,
        call_id: &str,
        agent_id: &str,
        call_data: &CallMetadata,
    ) -> Result<Vec<Alert>, RegistryError> {
        let module = self.get(result.module_name)?;
        if !result.has_violation {
            return Ok(Vec::new());
        }
        Ok(module.extract_alerts(result, call_id, agent_id, call_data))
    }
}

/// Collects capabilities, then freezes them into a [`ModuleRegistry`].
#[derive(Default)]
pub struct ModuleRegistryBuilder {
    modules: BTreeMap<ModuleName, Arc<dyn ModuleCapability>>,
}

impl ModuleRegistryBuilder {
    /// Register a capability, replacing any earlier one with the same name.
    pub fn register(mut self, module: Arc<dyn ModuleCapability>) -> Self {
        self.modules.insert(module.name(), module);
        self
    }

    pub fn build(self) -> ModuleRegistry {
        ModuleRegistry {
            modules: self.modules,
        }
    }
}
