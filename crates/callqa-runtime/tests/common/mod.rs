//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use callqa_core::{CallEvaluationRequest, CallMetadata, ModuleName};
use callqa_runtime::alerts::{AlertDispatchError, NotificationPayload, NotificationSink};
use callqa_runtime::providers::{ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError};
use callqa_runtime::{prompts, EvaluationBackend};

/// What the scripted provider answers for one module.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Text(String),
    Fail(String),
}

/// Provider that answers per module, identified from the system prompt.
///
/// Queued replies are used first; once a module's queue is empty its
/// fallback reply repeats.
#[derive(Default)]
pub struct ScriptedProvider {
    queued: Mutex<HashMap<ModuleName, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<ModuleName, Reply>>,
    calls: Mutex<HashMap<ModuleName, u32>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always(self, module: ModuleName, reply: Reply) -> Self {
        self.fallback.lock().insert(module, reply);
        self
    }

    pub fn then(self, module: ModuleName, reply: Reply) -> Self {
        self.queued.lock().entry(module).or_default().push_back(reply);
        self
    }

    pub fn calls(&self, module: ModuleName) -> u32 {
        self.calls.lock().get(&module).copied().unwrap_or(0)
    }

    fn module_for(messages: &[ChatMessage]) -> Option<ModuleName> {
        let system = &messages.first()?.content;
        ModuleName::ALL
            .into_iter()
            .find(|m| system.contains(prompts::module_prompt(*m).trim()))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let module = Self::module_for(&messages)
            .ok_or_else(|| ProviderError::ParseError("no module prompt in request".to_string()))?;
        *self.calls.lock().entry(module).or_default() += 1;

        let reply = self
            .queued
            .lock()
            .get_mut(&module)
            .and_then(|q| q.pop_front())
            .or_else(|| self.fallback.lock().get(&module).cloned())
            .ok_or_else(|| ProviderError::NotConfigured(format!("no reply scripted for {}", module)))?;

        let content = match reply {
            Reply::Json(value) => value.to_string(),
            Reply::Text(text) => text,
            Reply::Fail(message) => {
                return Err(ProviderError::ApiError {
                    status: 529,
                    message,
                })
            }
        };

        Ok(CompletionResponse {
            content,
            model: "scripted".to_string(),
            ..Default::default()
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn backend(provider: Arc<ScriptedProvider>) -> Arc<EvaluationBackend> {
    Arc::new(EvaluationBackend::new(provider, CompletionConfig::default()))
}

/// Sink that records deliveries, optionally rejecting all of them.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<NotificationPayload>>,
    pub attempts: Mutex<u32>,
    reject: bool,
}

impl RecordingSink {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), AlertDispatchError> {
        *self.attempts.lock() += 1;
        if self.reject {
            return Err(AlertDispatchError::Rejected {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        self.sent.lock().push(payload.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub fn sale_call(call_id: &str) -> CallEvaluationRequest {
    CallEvaluationRequest::new(
        call_id,
        "agent-7",
        "Agent: Thanks for calling, this call is recorded.\nCustomer: I'd like to buy the plan.\nAgent: Great, you're all set.",
        CallMetadata {
            duration: 330,
            talk_time: Some(300),
            disposition: Some("sale".to_string()),
            campaign: Some("spring".to_string()),
            agent_name: Some("Dana".to_string()),
            ..Default::default()
        },
    )
}
