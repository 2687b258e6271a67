//! Signed webhook delivery with retry and dead-lettering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use pricewatch_core::AlertId;
use pricewatch_tracking::{Alert, BackoffPolicy, EventType, WebhookEvent};

use crate::handle::{LoopHandle, spawn_loop};
use crate::signing::{SIGNATURE_HEADER, sign_payload};
use crate::stores::{AlertStore, StoreError, StoreResult, SubscriptionStore};

/// Default per-request delivery timeout.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure to hand the payload to a subscriber endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("endpoint returned status {0}")]
    Status(u16),
    #[error("delivery timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Io(String),
}

/// Seam for handing a signed payload to one endpoint.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn deliver(
        &self,
        endpoint: &str,
        signature: &str,
        body: &str,
    ) -> Result<(), TransportError>;
}

/// Production transport: HTTP POST with the signature header.
pub struct HttpWebhookTransport {
    client: reqwest::Client,
}

impl HttpWebhookTransport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn deliver(
        &self,
        endpoint: &str,
        signature: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(endpoint)
            .header(SIGNATURE_HEADER, signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Io(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    /// Budget for one request to one endpoint.
    pub delivery_timeout: Duration,
    /// How many due alerts one pass picks up.
    pub batch: usize,
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            batch: 20,
            backoff: BackoffPolicy::delivery(),
        }
    }
}

/// What one delivery pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

enum DeliveryOutcome {
    Delivered,
    Retried,
    DeadLettered,
}

/// Delivers pending alerts to matching subscriber endpoints.
pub struct WebhookDispatcher {
    alerts: Arc<dyn AlertStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn WebhookTransport>,
    config: DispatcherConfig,
}

impl WebhookDispatcher {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn WebhookTransport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            alerts,
            subscriptions,
            transport,
            config,
        }
    }

    /// One delivery pass over alerts that are `pending` or whose retry
    /// backoff has elapsed.
    pub async fn deliver_due(&self, now: DateTime<Utc>) -> DeliveryReport {
        let due = match self.alerts.due_for_delivery(now, self.config.batch) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "due-alert query failed, skipping pass");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        for mut alert in due {
            match self.deliver_one(&mut alert, now).await {
                Ok(DeliveryOutcome::Delivered) => report.delivered += 1,
                Ok(DeliveryOutcome::Retried) => report.retried += 1,
                Ok(DeliveryOutcome::DeadLettered) => report.dead_lettered += 1,
                Err(e) => warn!(alert_id = %alert.id, error = %e, "delivery pass failed"),
            }
        }
        report
    }

    /// Move a dead-lettered alert back to `pending`; the next pass picks
    /// it up.
    pub fn replay_dead_letter(&self, alert_id: AlertId) -> StoreResult<Alert> {
        let alert = self.alerts.requeue_dead_letter(alert_id)?;
        info!(alert_id = %alert.id, "dead-lettered alert requeued");
        Ok(alert)
    }

    /// Spawn the delivery loop.
    pub fn spawn(self: &Arc<Self>) -> LoopHandle {
        let dispatcher = Arc::clone(self);
        spawn_loop("dispatcher", self.config.tick_interval, move || {
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher.deliver_due(Utc::now()).await;
            }
        })
    }

    async fn deliver_one(
        &self,
        alert: &mut Alert,
        now: DateTime<Utc>,
    ) -> StoreResult<DeliveryOutcome> {
        let subscriptions = self
            .subscriptions
            .matching(alert.tenant_id, EventType::AlertRaised)?;

        if subscriptions.is_empty() {
            // No endpoint wants it; done rather than spinning forever.
            debug!(alert_id = %alert.id, "no matching subscriptions");
            alert.mark_delivered(now).map_err(domain_conflict)?;
            self.alerts.update(alert)?;
            return Ok(DeliveryOutcome::Delivered);
        }

        let attempt = match &alert.delivery {
            pricewatch_tracking::DeliveryState::Retrying { attempt, .. } => attempt + 1,
            _ => 1,
        };
        alert.mark_delivering().map_err(domain_conflict)?;
        self.alerts.update(alert)?;

        let event = WebhookEvent::for_alert(alert);
        let body = serde_json::to_string(&event)
            .map_err(|e| StoreError::Storage(format!("payload serialization failed: {e}")))?;

        // One failed endpoint retries the whole alert; endpoints that already
        // received it see the same event_id again and de-duplicate.
        let mut failure: Option<TransportError> = None;
        for subscription in &subscriptions {
            let signature = sign_payload(&subscription.secret, &body);
            let outcome = tokio::time::timeout(
                self.config.delivery_timeout,
                self.transport
                    .deliver(&subscription.endpoint, &signature, &body),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {
                    debug!(
                        alert_id = %alert.id,
                        endpoint = %subscription.endpoint,
                        "webhook delivered"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        alert_id = %alert.id,
                        endpoint = %subscription.endpoint,
                        attempt,
                        error = %e,
                        "webhook delivery failed"
                    );
                    failure = Some(e);
                }
                Err(_) => {
                    warn!(
                        alert_id = %alert.id,
                        endpoint = %subscription.endpoint,
                        attempt,
                        "webhook delivery timed out"
                    );
                    failure = Some(TransportError::Timeout);
                }
            }
        }

        let outcome = match failure {
            None => {
                alert.mark_delivered(now).map_err(domain_conflict)?;
                info!(alert_id = %alert.id, attempt, "alert delivered");
                DeliveryOutcome::Delivered
            }
            Some(error) if self.config.backoff.should_retry(attempt) => {
                let delay = self.config.backoff.delay_for_attempt(attempt);
                let next_attempt_at =
                    now + chrono::Duration::from_std(delay).unwrap_or_default();
                alert
                    .mark_retrying(attempt, next_attempt_at)
                    .map_err(domain_conflict)?;
                debug!(
                    alert_id = %alert.id,
                    attempt,
                    next_attempt_at = %next_attempt_at,
                    error = %error,
                    "delivery scheduled for retry"
                );
                DeliveryOutcome::Retried
            }
            Some(error) => {
                alert
                    .mark_dead_lettered(attempt, error.to_string())
                    .map_err(domain_conflict)?;
                warn!(
                    alert_id = %alert.id,
                    attempts = attempt,
                    error = %error,
                    "alert dead-lettered"
                );
                DeliveryOutcome::DeadLettered
            }
        };
        self.alerts.update(alert)?;
        Ok(outcome)
    }
}

fn domain_conflict(e: pricewatch_core::DomainError) -> StoreError {
    StoreError::Conflict(e.to_string())
}
