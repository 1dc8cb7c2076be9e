//! Result storage boundary.
//!
//! Results are upserted on `(call_id, module_name)`, so concurrent writers
//! for different modules never conflict and a repeated write replaces the
//! earlier row. Module configs are read through the same boundary, fresh on
//! every run.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use callqa_core::{LegacyQaRecord, ModuleConfigs, ModuleName, ModuleResult};

/// Errors from the result store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("write failed for {key}: {message}")]
    Write { key: String, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage key for a module result.
pub fn result_key(call_id: &str, module: ModuleName) -> String {
    format!("{}/{}", call_id, module)
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the result for `(call_id, result.module_name)`.
    async fn upsert_module_result(&self, call_id: &str, result: &ModuleResult) -> Result<(), StorageError>;

    /// Insert or replace the legacy QA row for `record.call_id`.
    async fn upsert_legacy_qa_result(&self, record: &LegacyQaRecord) -> Result<(), StorageError>;

    /// Current module configs.
    async fn get_module_configs(&self) -> Result<ModuleConfigs, StorageError>;

    async fn health(&self) -> bool;
}

/// In-memory store for tests and single-process use.
///
/// Writes for a module can be made to fail with [`fail_writes_for`](Self::fail_writes_for).
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: RwLock<HashMap<(String, ModuleName), ModuleResult>>,
    legacy: RwLock<HashMap<String, LegacyQaRecord>>,
    configs: RwLock<ModuleConfigs>,
    failing_modules: RwLock<HashSet<ModuleName>>,
    fail_legacy: RwLock<bool>,
    fail_config_reads: RwLock<bool>,
    writes: RwLock<u64>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: ModuleConfigs) -> Self {
        let store = Self::default();
        *store.configs.write() = configs;
        store
    }

    /// Replace the module configs, as an operator would.
    pub fn set_configs(&self, configs: ModuleConfigs) {
        *self.configs.write() = configs;
    }

    pub fn fail_writes_for(&self, module: ModuleName) {
        self.failing_modules.write().insert(module);
    }

    pub fn fail_legacy_writes(&self, fail: bool) {
        *self.fail_legacy.write() = fail;
    }

    pub fn fail_config_reads(&self, fail: bool) {
        *self.fail_config_reads.write() = fail;
    }

    pub fn result(&self, call_id: &str, module: ModuleName) -> Option<ModuleResult> {
        self.results.read().get(&(call_id.to_string(), module)).cloned()
    }

    pub fn results_for(&self, call_id: &str) -> Vec<ModuleResult> {
        let mut results: Vec<_> = self
            .results
            .read()
            .iter()
            .filter(|((id, _), _)| id == call_id)
            .map(|(_, r)| r.clone())
            .collect();
        results.sort_by_key(|r| r.module_name);
        results
    }

    pub fn legacy(&self, call_id: &str) -> Option<LegacyQaRecord> {
        self.legacy.read().get(call_id).cloned()
    }

    /// Successful primary-table writes so far.
    pub fn write_count(&self) -> u64 {
        *self.writes.read()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn upsert_module_result(&self, call_id: &str, result: &ModuleResult) -> Result<(), StorageError> {
        if self.failing_modules.read().contains(&result.module_name) {
            return Err(StorageError::Write {
                key: result_key(call_id, result.module_name),
                message: "injected write failure".to_string(),
            });
        }

        self.results
            .write()
            .insert((call_id.to_string(), result.module_name), result.clone());
        *self.writes.write() += 1;
        Ok(())
    }

    async fn upsert_legacy_qa_result(&self, record: &LegacyQaRecord) -> Result<(), StorageError> {
        if *self.fail_legacy.read() {
            return Err(StorageError::Write {
                key: record.call_id.clone(),
                message: "injected legacy write failure".to_string(),
            });
        }

        self.legacy.write().insert(record.call_id.clone(), record.clone());
        Ok(())
    }

    async fn get_module_configs(&self) -> Result<ModuleConfigs, StorageError> {
        if *self.fail_config_reads.read() {
            return Err(StorageError::Unavailable("injected config read failure".to_string()));
        }
        Ok(self.configs.read().clone())
    }

    async fn health(&self) -> bool {
        !*self.fail_config_reads.read()
    }
}
