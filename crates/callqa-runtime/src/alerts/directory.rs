//! Agent to manager lookups for notifications.
//!
//! A failed lookup never fails an alert; the dispatcher falls back to an
//! empty manager field.

use async_trait::async_trait;
use moka::future::Cache;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("manager lookup failed for agent {agent_id}: {message}")]
pub struct DirectoryError {
    pub agent_id: String,
    pub message: String,
}

#[async_trait]
pub trait ManagerDirectory: Send + Sync {
    /// The agent's manager email, `None` when the agent has no manager on file.
    async fn manager_email(&self, agent_id: &str) -> Result<Option<String>, DirectoryError>;
}

/// Fixed agent to manager table, usually from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    managers: BTreeMap<String, String>,
}

impl StaticDirectory {
    pub fn new(managers: BTreeMap<String, String>) -> Self {
        Self { managers }
    }
}

#[async_trait]
impl ManagerDirectory for StaticDirectory {
    async fn manager_email(&self, agent_id: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self.managers.get(agent_id).cloned())
    }
}

/// TTL cache in front of another directory.
///
/// Found and not-found answers are cached; lookup errors are not.
pub struct CachedDirectory {
    inner: Arc<dyn ManagerDirectory>,
    cache: Cache<String, Option<String>>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn ManagerDirectory>, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl ManagerDirectory for CachedDirectory {
    async fn manager_email(&self, agent_id: &str) -> Result<Option<String>, DirectoryError> {
        if let Some(hit) = self.cache.get(agent_id).await {
            return Ok(hit);
        }

        let found = self.inner.manager_email(agent_id).await?;
        self.cache.insert(agent_id.to_string(), found.clone()).await;
        Ok(found)
    }
}
