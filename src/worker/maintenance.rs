use super::{WorkerDeps, refresh_backend, wait_or_stop};
use crate::broker::{Broker, InboxBridge, OutboxBridge};
use crate::calls::CallProcessor;
use crate::calls::defaults::default_observations;
use crate::config::Config;
use crate::consent::ConsentGate;
use crate::llm::BackendSlot;
use crate::store::MaintenancePolicy;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What one maintenance tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub terminated: bool,
    /// Storage's summary of the maintenance pass, when one was due.
    pub maintenance: Option<Value>,
    /// Observations recorded by the subconscious pass, when one ran.
    pub observations: Option<usize>,
    pub outbox_sent: usize,
    pub inbox_ingested: usize,
}

/// The maintenance loop: housekeeping, the subconscious pass, and the
/// broker bridges.
pub struct MaintenanceWorker {
    deps: WorkerDeps,
    slot: Arc<BackendSlot>,
    processor: CallProcessor,
    outbox: OutboxBridge,
    inbox: InboxBridge,
    policy: MaintenancePolicy,
    interval: Duration,
    subconscious_interval: Option<Duration>,
    outbox_batch: usize,
    inbox_batch: usize,
    poll_interval: Duration,
}

impl MaintenanceWorker {
    pub fn new(
        deps: WorkerDeps,
        slot: Arc<BackendSlot>,
        gate: Arc<ConsentGate>,
        broker: Option<Arc<dyn Broker>>,
        config: &Config,
    ) -> Self {
        let maintenance = &config.maintenance;
        Self {
            processor: CallProcessor::new(gate, slot.clone(), config.llm.max_tokens),
            outbox: OutboxBridge::new(deps.messages.clone(), broker.clone(), &config.bridge),
            inbox: InboxBridge::new(deps.messages.clone(), broker, &config.bridge),
            policy: MaintenancePolicy {
                stale_after: Duration::from_secs(maintenance.stale_claim_secs),
                retention: Duration::from_secs(
                    maintenance.completed_retention_hours.saturating_mul(3600),
                ),
                max_retries: config.worker.max_retries,
            },
            interval: Duration::from_secs(maintenance.interval_secs),
            subconscious_interval: maintenance
                .subconscious_enabled
                .then(|| Duration::from_secs(maintenance.subconscious_interval_secs)),
            outbox_batch: config.bridge.outbox_batch,
            inbox_batch: config.bridge.inbox_batch,
            poll_interval: Duration::from_millis(maintenance.poll_interval_ms),
            deps,
            slot,
        }
    }

    pub async fn tick(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        refresh_backend(self.deps.settings.as_ref(), &self.slot).await;

        if self.deps.heartbeats.is_agent_terminated().await? {
            report.terminated = true;
            return Ok(report);
        }

        if self.deps.maintenance.maintenance_due(self.interval).await? {
            let summary = self.deps.maintenance.run_maintenance_tick(&self.policy).await?;
            tracing::info!(summary = %summary, "maintenance pass complete");
            report.maintenance = Some(summary);
        }

        if let Some(interval) = self.subconscious_interval
            && self.deps.maintenance.subconscious_due(interval).await?
        {
            report.observations = Some(self.subconscious().await?);
        }

        report.outbox_sent = self.outbox.publish(self.outbox_batch).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "outbox relay failed");
            0
        });
        report.inbox_ingested = self.inbox.poll(self.inbox_batch).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "inbox relay failed");
            0
        });
        Ok(report)
    }

    /// One observation pass. Whatever happens, the run is stamped so a
    /// withheld consent or a failing backend is not retried every tick.
    async fn subconscious(&self) -> Result<usize> {
        let context = self.deps.maintenance.subconscious_context().await?;
        let observations = match self.processor.observe(&context).await {
            Ok(Some(observations)) => observations,
            Ok(None) => {
                tracing::debug!("subconscious pass skipped; consent not granted");
                default_observations()
            }
            Err(e) => {
                tracing::warn!(error = %e, "subconscious pass failed");
                default_observations()
            }
        };
        let recorded = self.deps.maintenance.apply_observations(&observations).await?;
        if recorded > 0 {
            tracing::info!(recorded, "subconscious observations recorded");
        }
        Ok(recorded)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(poll_interval = ?self.poll_interval, "maintenance loop started");
        loop {
            match self.tick().await {
                Ok(report) if report.terminated => {
                    tracing::warn!("agent terminated; maintenance loop stopping");
                    break;
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "maintenance tick failed"),
            }
            if wait_or_stop(self.poll_interval, &mut shutdown).await {
                break;
            }
        }
        tracing::info!("maintenance loop stopped");
    }
}
