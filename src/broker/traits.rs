use super::types::InboundMessage;
use crate::error::BrokerError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// One acknowledged delivery; a payload that cannot be decoded is an `Err`
/// in its own slot so the deliveries around it survive.
pub type Delivered = Result<InboundMessage, BrokerError>;

/// Control surface of the external message broker.
pub trait Broker: Send + Sync {
    fn name(&self) -> &str;

    /// Declare a durable queue. Idempotent.
    fn declare_queue<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()>;

    /// Publish to the default exchange. `Ok(false)` means the broker accepted
    /// the message but had no queue bound to `routing_key`.
    fn publish<'a>(
        &'a self,
        routing_key: &'a str,
        message_id: &'a str,
        payload: &'a Value,
    ) -> BrokerFuture<'a, bool>;

    /// Fetch up to `max` messages, acknowledging them as they are handed out.
    /// Results keep broker order.
    fn fetch<'a>(&'a self, queue: &'a str, max: usize) -> BrokerFuture<'a, Vec<Delivered>>;
}
