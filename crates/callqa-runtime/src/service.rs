//! Wiring everything together from a [`RuntimeConfig`].

use std::sync::Arc;
use thiserror::Error;

use crate::alerts::{AlertDispatchError, AlertDispatcher};
use crate::backend::EvaluationBackend;
use crate::config::{RuntimeConfig, RuntimeConfigError};
use crate::engine::{
    FileInstanceStore, InstanceStore, InstanceStoreError, MemoryInstanceStore, WorkflowEngine,
};
use crate::pipeline::PipelineRunner;
use crate::providers::{LlmProvider, ProviderError, ProviderRegistry};
use crate::registry::ModuleRegistry;
use crate::store::ResultStore;

/// Errors assembling the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] RuntimeConfigError),

    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("notification setup failed: {0}")]
    Notifications(#[from] AlertDispatchError),

    #[error("instance store setup failed: {0}")]
    InstanceStore(#[from] InstanceStoreError),
}

/// The pipeline runner and workflow engine over one shared module registry.
#[derive(Debug, Clone)]
pub struct CallQaService {
    pub pipeline: PipelineRunner,
    pub engine: WorkflowEngine,
}

impl CallQaService {
    /// Build with the provider named in `config.backend.provider`.
    pub async fn connect(config: &RuntimeConfig, store: Arc<dyn ResultStore>) -> Result<Self, RuntimeError> {
        let providers = ProviderRegistry::with_defaults();
        let provider = providers.create(&config.backend.provider, &config.backend.provider_options)?;
        Self::with_provider(config, provider, store).await
    }

    /// Build around an existing provider.
    ///
    /// Workflow state goes to `state_dir` when set and stays in memory
    /// otherwise.
    pub async fn with_provider(
        config: &RuntimeConfig,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn ResultStore>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let backend = Arc::new(EvaluationBackend::from_config(provider, &config.backend));
        let registry = Arc::new(ModuleRegistry::with_backend(backend));
        let dispatcher = Arc::new(AlertDispatcher::from_config(&config.notifications, &config.directory)?);

        let instances: Arc<dyn InstanceStore> = match &config.state_dir {
            Some(dir) => Arc::new(FileInstanceStore::open(dir).await?),
            None => Arc::new(MemoryInstanceStore::new()),
        };

        tracing::info!(
            provider = %config.backend.provider,
            model = %config.backend.model,
            modules = registry.len(),
            sink = dispatcher.sink_name(),
            durable = config.state_dir.is_some(),
            "Call QA runtime ready"
        );

        let pipeline = PipelineRunner::new(Arc::clone(&registry), Arc::clone(&store), Arc::clone(&dispatcher))
            .with_retry(config.backend.retry.clone());
        let engine = WorkflowEngine::new(instances, registry, store, dispatcher).with_policies(config.steps.clone());

        Ok(Self { pipeline, engine })
    }
}
