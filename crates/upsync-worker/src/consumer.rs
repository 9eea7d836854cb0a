//! Queue consumer: long-poll loop, worker pool, and message disposition.
//!
//! Shutdown: [`EventConsumer::shutdown`] signals the loop to stop; it does
//! not wait for in-flight messages. Unfinished messages simply reappear
//! after their visibility timeout, which the at-least-once reconciler
//! absorbs.

use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use crate::normalizer::normalize;
use crate::reconciler::Reconciler;

/// Maximum delay in seconds before a failed message becomes visible again.
/// Caps exponential backoff so high receive counts do not produce
/// excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Computes backoff in seconds for a given receive count (exponential with
/// cap). Receive counts are unbounded on queues without a redrive policy, so
/// the exponentiation saturates instead of overflowing.
#[inline]
pub(crate) fn compute_retry_backoff_seconds(receive_count: i32) -> u64 {
    2_u64
        .saturating_pow(receive_count.max(0) as u32)
        .min(MAX_RETRY_BACKOFF_SECS)
}

/// What to do with a queue message after processing it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Delete the message; its events were fully handled (including the
    /// "nothing to do" outcomes).
    Ack,
    /// Park the message on the dead-letter queue; it can never be handled.
    DeadLetter(String),
    /// Leave the message invisible for a backoff and let it redeliver.
    Retry,
}

#[derive(Clone)]
pub struct ConsumerConfig {
    pub queue_url: String,
    pub dead_letter_queue_url: Option<String>,
    pub key_prefix: String,
    pub max_workers: usize,
    pub poll_wait_secs: i32,
    pub max_messages: i32,
}

pub struct EventConsumer {
    shutdown_tx: mpsc::Sender<()>,
}

impl EventConsumer {
    /// Spawn the consumer loop on the current runtime.
    pub fn new(
        client: aws_sdk_sqs::Client,
        config: ConsumerConfig,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            Self::consumer_loop(client, config, reconciler, shutdown_rx).await;
        });

        Self { shutdown_tx }
    }

    /// Signals the consumer loop to stop polling and exit.
    ///
    /// Returns immediately; in-flight message handlers finish on their own
    /// and any message they do not delete redelivers later.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating event consumer shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn consumer_loop(
        client: aws_sdk_sqs::Client,
        config: ConsumerConfig,
        reconciler: Arc<Reconciler>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            queue_url = %config.queue_url,
            max_workers = config.max_workers,
            poll_wait_secs = config.poll_wait_secs,
            "Event consumer started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Event consumer shutting down");
                    break;
                }
                received = client
                    .receive_message()
                    .queue_url(&config.queue_url)
                    .wait_time_seconds(config.poll_wait_secs)
                    .max_number_of_messages(config.max_messages)
                    .message_system_attribute_names(
                        MessageSystemAttributeName::ApproximateReceiveCount,
                    )
                    .send() =>
                {
                    let messages = match received {
                        Ok(output) => output.messages.unwrap_or_default(),
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to receive from queue");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                            continue;
                        }
                    };

                    for message in messages {
                        let permit = match semaphore.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        };
                        let client = client.clone();
                        let config = config.clone();
                        let reconciler = reconciler.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            Self::handle_message(&client, &config, &reconciler, message).await;
                        });
                    }
                }
            }
        }

        tracing::info!("Event consumer stopped");
    }

    #[tracing::instrument(skip_all, fields(message_id = message.message_id().unwrap_or("<none>")))]
    async fn handle_message(
        client: &aws_sdk_sqs::Client,
        config: &ConsumerConfig,
        reconciler: &Reconciler,
        message: Message,
    ) {
        let (Some(message_id), Some(receipt_handle), Some(body)) = (
            message.message_id(),
            message.receipt_handle(),
            message.body(),
        ) else {
            tracing::error!("Received message without id, receipt handle, or body");
            return;
        };

        let disposition = process_body(reconciler, &config.key_prefix, message_id, body).await;

        match disposition {
            Disposition::Ack => {
                Self::delete(client, &config.queue_url, receipt_handle).await;
            }
            Disposition::DeadLetter(reason) => {
                Self::dead_letter(client, config, body, receipt_handle, &reason).await;
            }
            Disposition::Retry => {
                let receive_count = message
                    .attributes()
                    .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                    .and_then(|v| v.parse::<i32>().ok())
                    .unwrap_or(1);
                let backoff_seconds = compute_retry_backoff_seconds(receive_count);
                tracing::info!(
                    receive_count = receive_count,
                    backoff_seconds = backoff_seconds,
                    "Scheduling message redelivery"
                );
                let result = client
                    .change_message_visibility()
                    .queue_url(&config.queue_url)
                    .receipt_handle(receipt_handle)
                    .visibility_timeout(backoff_seconds as i32)
                    .send()
                    .await;
                if let Err(e) = result {
                    // The message redelivers at the default visibility
                    // timeout instead.
                    tracing::warn!(error = %e, "Failed to adjust message visibility");
                }
            }
        }
    }

    async fn delete(client: &aws_sdk_sqs::Client, queue_url: &str, receipt_handle: &str) {
        let result = client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await;
        if let Err(e) = result {
            // Redelivery of an already-handled message is harmless.
            tracing::warn!(error = %e, "Failed to delete message");
        }
    }

    async fn dead_letter(
        client: &aws_sdk_sqs::Client,
        config: &ConsumerConfig,
        body: &str,
        receipt_handle: &str,
        reason: &str,
    ) {
        let Some(dlq_url) = config.dead_letter_queue_url.as_deref() else {
            tracing::error!(
                reason = %reason,
                body = %body,
                "Malformed message and no dead-letter queue configured, dropping"
            );
            Self::delete(client, &config.queue_url, receipt_handle).await;
            return;
        };

        tracing::error!(reason = %reason, "Parking malformed message on dead-letter queue");
        let sent = client
            .send_message()
            .queue_url(dlq_url)
            .message_body(body)
            .send()
            .await;
        match sent {
            Ok(_) => Self::delete(client, &config.queue_url, receipt_handle).await,
            Err(e) => {
                // Keep the message; it redelivers and we try the park again.
                tracing::error!(error = %e, "Failed to park message on dead-letter queue");
            }
        }
    }
}

/// Process one message body and decide its fate.
///
/// Business outcomes, including `Ignored` and `Anomaly`, all acknowledge:
/// redelivering such a message can never change the result. Only store-side
/// failures leave the message for redelivery.
pub(crate) async fn process_body(
    reconciler: &Reconciler,
    key_prefix: &str,
    message_id: &str,
    body: &str,
) -> Disposition {
    let events = match normalize(message_id, body, key_prefix) {
        Ok(events) => events,
        Err(e) => return Disposition::DeadLetter(e.to_string()),
    };

    for event in &events {
        match reconciler.reconcile(event).await {
            Ok(outcome) => {
                tracing::debug!(
                    object_key = %event.object_key,
                    outcome = ?outcome,
                    "Event reconciled"
                );
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "Transient failure, message will redeliver");
                return Disposition::Retry;
            }
            Err(e) => return Disposition::DeadLetter(e.to_string()),
        }
    }

    Disposition::Ack
}
