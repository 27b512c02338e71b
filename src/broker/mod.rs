//! Outbox/inbox relay between local storage and an optional external broker.

mod bridge;
mod rabbitmq;
mod traits;
mod types;

pub use bridge::{InboxBridge, OutboxBridge};
pub use rabbitmq::RabbitMqManagementBroker;
pub use traits::{Broker, BrokerFuture, Delivered};
pub use types::{InboundMessage, OutboxMessage, OutboxStatus};

use crate::config::BridgeConfig;
use std::sync::Arc;

/// The configured broker, or `None` when bridging is off or unusable. Every
/// bridge operation is a no-op without one.
pub fn connect(config: &BridgeConfig) -> Option<Arc<dyn Broker>> {
    if !config.enabled {
        return None;
    }
    let Some(url) = config.management_url.as_deref() else {
        tracing::warn!("bridge enabled without a management url; bridging disabled");
        return None;
    };
    match RabbitMqManagementBroker::new(url, config) {
        Ok(broker) => {
            tracing::info!(url, vhost = %config.vhost, "broker bridge enabled");
            Some(Arc::new(broker))
        }
        Err(e) => {
            tracing::warn!(error = %e, "broker unusable; bridging disabled");
            None
        }
    }
}
