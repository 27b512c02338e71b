use super::traits::Broker;
use crate::config::BridgeConfig;
use crate::error::BrokerError;
use crate::store::MessageStore;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Declares `queue` on first use. A failure leaves the flag unset so the
/// next tick tries again.
async fn ensure_declared(broker: &dyn Broker, queue: &str, declared: &AtomicBool) -> bool {
    if declared.load(Ordering::Acquire) {
        return true;
    }
    match broker.declare_queue(queue).await {
        Ok(()) => {
            declared.store(true, Ordering::Release);
            true
        }
        Err(e) => {
            tracing::warn!(broker = broker.name(), queue, error = %e, "queue declaration failed");
            false
        }
    }
}

/// Relays pending outbox rows to the broker. At-least-once: a crash after
/// the broker accepts a message but before it is marked sent redelivers it.
pub struct OutboxBridge {
    store: Arc<dyn MessageStore>,
    broker: Option<Arc<dyn Broker>>,
    queue: String,
    declared: AtomicBool,
}

impl OutboxBridge {
    pub fn new(
        store: Arc<dyn MessageStore>,
        broker: Option<Arc<dyn Broker>>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            store,
            broker,
            queue: config.outbox_queue.clone(),
            declared: AtomicBool::new(false),
        }
    }

    /// Deliver up to `max` pending messages oldest-first. Stops at the first
    /// failure; returns how many were sent.
    pub async fn publish(&self, max: usize) -> Result<usize> {
        let Some(broker) = self.broker.as_deref() else {
            return Ok(0);
        };
        if max == 0 || !ensure_declared(broker, &self.queue, &self.declared).await {
            return Ok(0);
        }

        let pending = self.store.pending_outbox(max).await?;
        let mut sent = 0;
        for message in &pending {
            let delivered = match broker
                .publish(&self.queue, &message.id, &message.envelope())
                .await
            {
                Ok(true) => Ok(()),
                Ok(false) => Err(BrokerError::Unrouted {
                    routing_key: self.queue.clone(),
                }),
                Err(e) => Err(e),
            };

            match delivered {
                Ok(()) => {
                    self.store.mark_outbox_sent(&message.id).await?;
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        error = %e,
                        "outbox delivery failed; stopping batch"
                    );
                    self.store
                        .mark_outbox_failed(&message.id, &e.to_string())
                        .await?;
                    break;
                }
            }
        }

        if !pending.is_empty() {
            tracing::info!(sent, attempted = pending.len(), "outbox batch relayed");
        }
        Ok(sent)
    }
}

/// Pulls inbound messages from the broker. At-most-once: messages are
/// acknowledged on fetch and never handed back.
pub struct InboxBridge {
    store: Arc<dyn MessageStore>,
    broker: Option<Arc<dyn Broker>>,
    queue: String,
    min_interval: Duration,
    declared: AtomicBool,
    last_poll: Mutex<Option<Instant>>,
}

impl InboxBridge {
    pub fn new(
        store: Arc<dyn MessageStore>,
        broker: Option<Arc<dyn Broker>>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            store,
            broker,
            queue: config.inbox_queue.clone(),
            min_interval: Duration::from_millis(config.inbox_min_interval_ms),
            declared: AtomicBool::new(false),
            last_poll: Mutex::new(None),
        }
    }

    /// Claim this poll slot, or `false` if the last poll was too recent.
    async fn take_slot(&self) -> bool {
        let mut last = self.last_poll.lock().await;
        if let Some(at) = *last
            && at.elapsed() < self.min_interval
        {
            return false;
        }
        *last = Some(Instant::now());
        true
    }

    /// Fetch up to `max` messages and ingest them in order. Returns how many
    /// were ingested; the first undecodable or unstorable message drops
    /// itself and the rest of the batch.
    pub async fn poll(&self, max: usize) -> Result<usize> {
        let Some(broker) = self.broker.as_deref() else {
            return Ok(0);
        };
        if max == 0 || !self.take_slot().await {
            return Ok(0);
        }
        if !ensure_declared(broker, &self.queue, &self.declared).await {
            return Ok(0);
        }

        let messages = match broker.fetch(&self.queue, max).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(queue = %self.queue, error = %e, "inbox fetch failed");
                return Ok(0);
            }
        };

        let mut ingested = 0;
        for delivered in &messages {
            let stored = match delivered {
                Ok(message) => match self.store.ingest_inbound(message).await {
                    Ok(memory_id) => self.store.touch_last_contact().await.map(|()| memory_id),
                    Err(e) => Err(e),
                },
                Err(e) => Err(anyhow::anyhow!("undecodable delivery: {e}")),
            };
            match stored {
                Ok(memory_id) => {
                    tracing::debug!(memory_id = %memory_id, "inbound message ingested");
                    ingested += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        dropped = messages.len() - ingested,
                        error = %e,
                        "inbound ingestion failed; dropping rest of batch"
                    );
                    break;
                }
            }
        }

        if !messages.is_empty() {
            tracing::info!(ingested, fetched = messages.len(), "inbox batch ingested");
        }
        Ok(ingested)
    }
}
