//! Trigger resolution against live module configs.

use callqa_core::{trigger, CallMetadata, Resolution};

use crate::registry::ModuleRegistry;
use crate::store::{ResultStore, StorageError};

/// Which registered modules run for a call.
///
/// Configs are read from the store on every call. A read failure is the
/// only error; zero eligible modules is an empty, successful resolution.
pub async fn resolve_modules(
    registry: &ModuleRegistry,
    store: &dyn ResultStore,
    metadata: &CallMetadata,
) -> Result<Resolution, StorageError> {
    let configs = store.get_module_configs().await?;
    let resolution = trigger::resolve(registry.names(), &configs, metadata);

    tracing::debug!(
        eligible = resolution.eligible.len(),
        skipped = resolution.skipped.len(),
        inactive = resolution.inactive.len(),
        "Resolved modules"
    );

    Ok(resolution)
}
