//! Asynchronous webhook delivery.
//!
//! A bounded FIFO queue feeds a single long-lived worker task. Producers
//! block when the queue is full; nothing is ever dropped for lack of
//! space. Rate limiting (HTTP 429) is handled by sleeping and retrying
//! the same message in place, which keeps delivery order intact and
//! cannot deadlock against a producer the way re-enqueueing could.

mod message;

pub use message::{Embed, EmbedAuthor, EmbedField, RateLimitResponse, WebhookMessage};

use std::time::Duration;

use metrics::counter;
use reqwest::StatusCode;
use snafu::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WebhookConfig;
use crate::error::{ClientBuildSnafu, DeliveryError};

/// Counters kept by the delivery worker, reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Messages acknowledged by the endpoint.
    pub delivered: u64,
    /// Messages abandoned after a transport failure or rejection.
    pub dropped: u64,
    /// Rate-limit pauses taken (a message may contribute several).
    pub rate_limit_retries: u64,
}

/// Handle to the delivery queue and its worker task.
pub struct Notifier {
    tx: mpsc::Sender<WebhookMessage>,
    worker: JoinHandle<DeliveryStats>,
}

impl Notifier {
    /// Create the queue and start the single delivery worker.
    pub fn new(config: WebhookConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context(ClientBuildSnafu)?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let worker = tokio::spawn(run_delivery_worker(client, config, rx));

        Ok(Self { tx, worker })
    }

    /// Enqueue a message for delivery, waiting if the queue is full.
    pub async fn enqueue(&self, message: WebhookMessage) -> Result<(), DeliveryError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| DeliveryError::QueueClosed)
    }

    /// Stop accepting messages, wait for the worker to drain everything
    /// already queued, and return its stats.
    pub async fn close(self) -> DeliveryStats {
        drop(self.tx);
        match self.worker.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "delivery worker panicked");
                DeliveryStats::default()
            }
        }
    }
}

/// Outcome of one delivery attempt.
enum SendOutcome {
    /// Endpoint acknowledged with the expected success status.
    Delivered,
    /// Endpoint asked us to slow down; retry the same message after the
    /// delay.
    RateLimited(Duration),
    /// Transport failure or rejection; the message is abandoned.
    Dropped,
}

/// Drain the queue until every sender is gone, then report stats.
async fn run_delivery_worker(
    client: reqwest::Client,
    config: WebhookConfig,
    mut rx: mpsc::Receiver<WebhookMessage>,
) -> DeliveryStats {
    let mut stats = DeliveryStats::default();

    while let Some(message) = rx.recv().await {
        // Retry in place until the message is delivered or dropped.
        // Never re-enqueue: that reorders deliveries and can deadlock a
        // producer blocked on a full queue.
        loop {
            match attempt_send(&client, &config, &message).await {
                SendOutcome::Delivered => {
                    stats.delivered += 1;
                    counter!("tern_messages_delivered_total").increment(1);
                    break;
                }
                SendOutcome::Dropped => {
                    stats.dropped += 1;
                    counter!("tern_messages_dropped_total").increment(1);
                    break;
                }
                SendOutcome::RateLimited(delay) => {
                    stats.rate_limit_retries += 1;
                    counter!("tern_rate_limit_retries_total").increment(1);
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    debug!(
        delivered = stats.delivered,
        dropped = stats.dropped,
        "delivery queue drained"
    );
    stats
}

/// POST one message and classify the response.
async fn attempt_send(
    client: &reqwest::Client,
    config: &WebhookConfig,
    message: &WebhookMessage,
) -> SendOutcome {
    let response = match client.post(&config.url).json(message).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "webhook request failed, dropping message");
            return SendOutcome::Dropped;
        }
    };

    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return SendOutcome::Delivered;
    }

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let delay = match serde_json::from_str::<RateLimitResponse>(&body) {
            Ok(limit) => config.retry_after_unit.to_duration(limit.retry_after),
            Err(e) => {
                warn!(
                    error = %e,
                    fallback_secs = config.fallback_retry_secs,
                    "could not parse retry_after, using fallback delay"
                );
                Duration::from_secs(config.fallback_retry_secs)
            }
        };
        return SendOutcome::RateLimited(delay);
    }

    warn!(status = %status, body = %body, "webhook rejected message, dropping");
    SendOutcome::Dropped
}
