//! Notification sinks.

use async_trait::async_trait;

use super::{AlertDispatchError, NotificationPayload};

/// Where notifications go.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), AlertDispatchError>;

    fn name(&self) -> &str;
}

/// Sink used when no destination is configured. Accepts and drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), AlertDispatchError> {
        tracing::trace!(
            call_id = %payload.call_id,
            module = %payload.module_name,
            "No notification sink configured; dropping alert"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(feature = "webhook")]
pub use webhook::WebhookSink;

#[cfg(feature = "webhook")]
mod webhook {
    use super::*;
    use crate::providers::{ApiCredential, CredentialSource};
    use std::time::Duration;

    /// POSTs each notification as JSON.
    pub struct WebhookSink {
        url: String,
        token: Option<ApiCredential>,
        client: reqwest::Client,
    }

    impl std::fmt::Debug for WebhookSink {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("WebhookSink")
                .field("url", &self.url)
                .field("token", &self.token)
                .finish()
        }
    }

    impl WebhookSink {
        pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertDispatchError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| AlertDispatchError::Transport(e.to_string()))?;

            Ok(Self {
                url: url.into(),
                token: None,
                client,
            })
        }

        pub fn with_token(mut self, token: impl Into<String>) -> Self {
            self.token = Some(ApiCredential::new(token, CredentialSource::Config, "Webhook token"));
            self
        }
    }

    #[async_trait]
    impl NotificationSink for WebhookSink {
        async fn send(&self, payload: &NotificationPayload) -> Result<(), AlertDispatchError> {
            let mut request = self.client.post(&self.url).json(payload);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token.expose());
            }

            let response = request
                .send()
                .await
                .map_err(|e| AlertDispatchError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AlertDispatchError::Rejected {
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                });
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "webhook"
        }
    }
}
