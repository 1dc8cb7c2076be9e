//! Alert dispatch.
//!
//! Modules decide what an alert says. Everything after that is uniform:
//! enrich with the manager from the directory, format a notification, and
//! hand it to the sink. Dispatch failures are logged and counted, never
//! propagated to the evaluation that produced the alert.

mod directory;
mod sink;

pub use directory::{CachedDirectory, DirectoryError, ManagerDirectory, StaticDirectory};
pub use sink::{NoopSink, NotificationSink};

#[cfg(feature = "webhook")]
pub use sink::WebhookSink;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use callqa_core::{Alert, ModuleName};

use crate::config::{DirectoryConfig, NotificationConfig};

/// Errors delivering a notification. Always non-fatal to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertDispatchError {
    #[error("sink rejected notification with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("sink request failed: {0}")]
    Transport(String),

    #[error("notifications misconfigured: {0}")]
    Config(String),
}

/// JSON body delivered to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub call_id: String,
    pub module_name: ModuleName,
    pub violation_type: String,

    /// Human readable line naming the module, agent and violation
    pub summary: String,

    pub timestamp: DateTime<Utc>,

    /// Empty when the agent has no manager on file or the lookup failed
    pub manager_email: String,

    pub evidence: Vec<String>,
    pub detail: Value,
    pub call_duration: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
}

impl NotificationPayload {
    pub fn from_alert(alert: &Alert, manager_email: impl Into<String>) -> Self {
        Self {
            call_id: alert.call_id.clone(),
            module_name: alert.module_name,
            violation_type: alert.violation_type.clone(),
            summary: format_summary(alert),
            timestamp: alert.created_at,
            manager_email: manager_email.into(),
            evidence: alert.evidence.clone(),
            detail: alert.detail.clone(),
            call_duration: alert.call_duration,
            agent_id: Some(alert.agent_id.clone()).filter(|id| !id.is_empty()),
            agent_name: alert.agent_name.clone(),
            campaign: alert.campaign.clone(),
            disposition: alert.disposition.clone(),
        }
    }
}

fn format_summary(alert: &Alert) -> String {
    let agent = match &alert.agent_name {
        Some(name) => format!("{} ({})", name, alert.agent_id),
        None => alert.agent_id.clone(),
    };
    format!(
        "[{}] {} on call {} by agent {}",
        alert.module_name, alert.summary, alert.call_id, agent
    )
}

/// Counts from one batch of deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers alerts to a sink, enriched with manager lookups.
pub struct AlertDispatcher {
    sink: Arc<dyn NotificationSink>,
    directory: Option<Arc<dyn ManagerDirectory>>,
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("sink", &self.sink.name())
            .field("directory", &self.directory.is_some())
            .finish()
    }
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            directory: None,
        }
    }

    /// Dispatcher that drops everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    pub fn with_directory(mut self, directory: Arc<dyn ManagerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Build from configuration.
    ///
    /// No webhook URL gives a no-op sink. A non-empty manager table is served
    /// through a TTL cache.
    pub fn from_config(
        notifications: &NotificationConfig,
        directory: &DirectoryConfig,
    ) -> Result<Self, AlertDispatchError> {
        let dispatcher = Self::new(sink_from_config(notifications)?);

        if directory.managers.is_empty() {
            return Ok(dispatcher);
        }

        let table = Arc::new(StaticDirectory::new(directory.managers.clone()));
        Ok(dispatcher.with_directory(Arc::new(CachedDirectory::new(
            table,
            directory.capacity,
            directory.cache_ttl,
        ))))
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    async fn manager_for(&self, agent_id: &str) -> String {
        let Some(directory) = &self.directory else {
            return String::new();
        };

        match directory.manager_email(agent_id).await {
            Ok(found) => found.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(agent_id, error = %e, "Manager lookup failed; sending without manager");
                String::new()
            }
        }
    }

    /// Deliver one alert.
    pub async fn deliver(&self, alert: &Alert) -> Result<(), AlertDispatchError> {
        let manager = self.manager_for(&alert.agent_id).await;
        let payload = NotificationPayload::from_alert(alert, manager);
        self.sink.send(&payload).await
    }

    /// Deliver every alert concurrently, logging failures.
    pub async fn deliver_all(&self, alerts: &[Alert]) -> DispatchSummary {
        self.deliver_remaining(alerts, &mut vec![false; alerts.len()]).await
    }

    /// Deliver the alerts not yet marked in `delivered`, marking each success.
    ///
    /// The summary counts the whole batch, including alerts marked before
    /// this call.
    pub async fn deliver_remaining(&self, alerts: &[Alert], delivered: &mut [bool]) -> DispatchSummary {
        let pending: Vec<usize> = (0..alerts.len())
            .filter(|&i| !delivered.get(i).copied().unwrap_or(false))
            .collect();
        let outcomes = join_all(pending.iter().map(|&i| self.deliver(&alerts[i]))).await;

        for (i, outcome) in pending.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    if let Some(mark) = delivered.get_mut(i) {
                        *mark = true;
                    }
                }
                Err(e) => {
                    let alert = &alerts[i];
                    tracing::warn!(
                        call_id = %alert.call_id,
                        module = %alert.module_name,
                        violation = %alert.violation_type,
                        error = %e,
                        "Alert delivery failed"
                    );
                }
            }
        }

        let done = delivered.iter().take(alerts.len()).filter(|d| **d).count();
        let summary = DispatchSummary {
            delivered: done,
            failed: alerts.len() - done,
        };

        if !alerts.is_empty() {
            tracing::info!(
                sink = self.sink.name(),
                delivered = summary.delivered,
                failed = summary.failed,
                "Dispatched alerts"
            );
        }
        summary
    }

    /// Deliver in the background. The caller never waits on the sink.
    pub fn dispatch(self: &Arc<Self>, alerts: Vec<Alert>) -> JoinHandle<DispatchSummary> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.deliver_all(&alerts).await })
    }
}

#[cfg(feature = "webhook")]
fn sink_from_config(config: &NotificationConfig) -> Result<Arc<dyn NotificationSink>, AlertDispatchError> {
    let Some(url) = &config.webhook_url else {
        return Ok(Arc::new(NoopSink));
    };

    let mut sink = WebhookSink::new(url.clone(), config.timeout)?;
    if let Some(token) = config.webhook_token.as_ref().filter(|t| !t.is_empty()) {
        sink = sink.with_token(token.clone());
    }
    Ok(Arc::new(sink))
}

#[cfg(not(feature = "webhook"))]
fn sink_from_config(config: &NotificationConfig) -> Result<Arc<dyn NotificationSink>, AlertDispatchError> {
    if config.webhook_url.is_some() {
        tracing::warn!("webhook_url is set but the webhook feature is disabled; notifications are dropped");
    }
    Ok(Arc::new(NoopSink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<NotificationPayload>>,
        reject: bool,
    }

    #[async_trait]
    impl NotificationSink for Recording {
        async fn send(&self, payload: &NotificationPayload) -> Result<(), AlertDispatchError> {
            if self.reject {
                return Err(AlertDispatchError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.sent.lock().push(payload.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct Broken;

    #[async_trait]
    impl ManagerDirectory for Broken {
        async fn manager_email(&self, agent_id: &str) -> Result<Option<String>, DirectoryError> {
            Err(DirectoryError {
                agent_id: agent_id.to_string(),
                message: "timeout".to_string(),
            })
        }
    }

    fn alert() -> Alert {
        Alert {
            call_id: "call-1".to_string(),
            module_name: ModuleName::Disclosure,
            violation_type: "missing_disclosure".to_string(),
            agent_id: "agent-7".to_string(),
            agent_name: Some("Dana".to_string()),
            summary: "Recording disclosure not given".to_string(),
            evidence: vec!["Agent: let's get started".to_string()],
            detail: json!({ "missing": ["recording"] }),
            call_duration: 240,
            campaign: Some("spring".to_string()),
            disposition: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_payload_carries_request_context() {
        let a = alert();
        let payload = NotificationPayload::from_alert(&a, "lead@example.com");
        assert_eq!(
            payload.summary,
            "[disclosure] Recording disclosure not given on call call-1 by agent Dana (agent-7)"
        );
        assert_eq!(payload.call_duration, 240);
        assert_eq!(payload.timestamp, a.created_at);

        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body["manager_email"], "lead@example.com");
        assert_eq!(body["campaign"], "spring");
        assert!(body.get("disposition").is_none());
    }

    #[tokio::test]
    async fn test_manager_resolved_from_directory() {
        let sink = Arc::new(Recording::default());
        let directory = StaticDirectory::new(BTreeMap::from([(
            "agent-7".to_string(),
            "lead@example.com".to_string(),
        )]));
        let dispatcher = AlertDispatcher::new(sink.clone()).with_directory(Arc::new(directory));

        dispatcher.deliver(&alert()).await.unwrap();
        assert_eq!(sink.sent.lock()[0].manager_email, "lead@example.com");
    }

    #[tokio::test]
    async fn test_directory_failure_degrades_to_empty_manager() {
        let sink = Arc::new(Recording::default());
        let dispatcher = AlertDispatcher::new(sink.clone()).with_directory(Arc::new(Broken));

        dispatcher.deliver(&alert()).await.unwrap();
        assert_eq!(sink.sent.lock()[0].manager_email, "");
    }

    #[tokio::test]
    async fn test_sink_failures_counted_not_raised() {
        let sink = Arc::new(Recording {
            reject: true,
            ..Default::default()
        });
        let dispatcher = AlertDispatcher::new(sink);

        let summary = dispatcher.deliver_all(&[alert(), alert()]).await;
        assert_eq!(summary, DispatchSummary { delivered: 0, failed: 2 });
    }

    #[tokio::test]
    async fn test_deliver_remaining_skips_marked() {
        let sink = Arc::new(Recording::default());
        let dispatcher = AlertDispatcher::new(sink.clone());
        let mut second = alert();
        second.violation_type = "missing_price_disclosure".to_string();

        let mut delivered = vec![true, false];
        let summary = dispatcher.deliver_remaining(&[alert(), second], &mut delivered).await;

        assert_eq!(summary, DispatchSummary { delivered: 2, failed: 0 });
        assert_eq!(delivered, vec![true, true]);
        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].violation_type, "missing_price_disclosure");
    }

    #[tokio::test]
    async fn test_background_dispatch() {
        let sink = Arc::new(Recording::default());
        let dispatcher = Arc::new(AlertDispatcher::new(sink.clone()));

        let summary = dispatcher.dispatch(vec![alert()]).await.unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(sink.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_sink_is_silent() {
        let dispatcher =
            AlertDispatcher::from_config(&NotificationConfig::default(), &DirectoryConfig::default()).unwrap();
        assert_eq!(dispatcher.sink_name(), "noop");
        assert!(dispatcher.deliver(&alert()).await.is_ok());
    }
}
