//! Outbound check-in notifications.
//!
//! The core always talks to a `CheckinNotifier`; deployments without a
//! webhook get the no-op implementation, so no call site ever branches on
//! "is this configured". Delivery is fire-and-forget with its own timeout
//! and a bounded retry budget, fully decoupled from the inbound request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::models::attendance_event::AttendanceAction;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
pub struct CheckinNotification {
    pub event_id: Uuid,
    pub event_slug: String,
    pub registration_id: Uuid,
    pub email: String,
    pub action: AttendanceAction,
    pub actor: String,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckinNotifier: Send + Sync {
    async fn notify(&self, notification: CheckinNotification);
}

/// Default implementation when no webhook is configured
pub struct NoopNotifier;

#[async_trait]
impl CheckinNotifier for NoopNotifier {
    async fn notify(&self, _notification: CheckinNotification) {}
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    max_attempts: u32,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            url,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    #[cfg(test)]
    fn with_attempts(url: String, max_attempts: u32) -> Self {
        let mut notifier = Self::new(url);
        notifier.max_attempts = max_attempts;
        notifier
    }
}

#[async_trait]
impl CheckinNotifier for WebhookNotifier {
    async fn notify(&self, notification: CheckinNotification) {
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=self.max_attempts {
            match self
                .client
                .post(&self.url)
                .json(&notification)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(
                        registration_id = %notification.registration_id,
                        attempt,
                        "Webhook delivered"
                    );
                    return;
                }
                Ok(response) => {
                    tracing::warn!(
                        registration_id = %notification.registration_id,
                        status = %response.status(),
                        attempt,
                        "Webhook rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        registration_id = %notification.registration_id,
                        error = %e,
                        attempt,
                        "Webhook delivery failed"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        tracing::error!(
            registration_id = %notification.registration_id,
            attempts = self.max_attempts,
            "Webhook delivery gave up"
        );
    }
}

/// Picks the notifier implementation from configuration
pub fn from_config(config: &Config) -> Arc<dyn CheckinNotifier> {
    match &config.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Check-in webhook enabled");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(NoopNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> CheckinNotification {
        CheckinNotification {
            event_id: Uuid::new_v4(),
            event_slug: "conf-2026".to_string(),
            registration_id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            action: AttendanceAction::In,
            actor: "S1".to_string(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_notification_as_json() {
        let server = MockServer::start().await;
        let n = notification();

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json_string(serde_json::to_string(&n).unwrap()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri()));
        notifier.notify(n).await;
    }

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::with_attempts(server.uri(), 3);
        notifier.notify(notification()).await;
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        // Bounded: exactly max_attempts requests, then stop
        let notifier = WebhookNotifier::with_attempts(server.uri(), 2);
        notifier.notify(notification()).await;
    }
}
