use super::{WorkerDeps, refresh_backend, wait_or_stop};
use crate::calls::{CallProcessor, heartbeat_decision};
use crate::config::Config;
use crate::consent::ConsentGate;
use crate::heartbeat::{EngineLimits, HeartbeatActionEngine, HeartbeatOutcome, signals_termination};
use crate::llm::BackendSlot;
use crate::queue::{RetryPolicy, Settlement, WorkItem};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ItemDisposition {
    Completed,
    Requeued,
    Failed,
}

/// What one decision tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// The agent is terminated; the loop should stop.
    pub terminated: bool,
    pub heartbeat_started: Option<String>,
    pub item_id: Option<String>,
    pub disposition: Option<ItemDisposition>,
    pub heartbeat: Option<HeartbeatOutcome>,
}

/// The decision loop: claim one item per tick, dispatch it, settle it.
pub struct DecisionWorker {
    deps: WorkerDeps,
    slot: Arc<BackendSlot>,
    processor: Arc<CallProcessor>,
    retry: RetryPolicy,
    engine: HeartbeatActionEngine,
    poll_interval: Duration,
}

impl DecisionWorker {
    /// `gate` is shared with every other worker in the process so consent
    /// is asked for at most once.
    pub fn new(
        deps: WorkerDeps,
        slot: Arc<BackendSlot>,
        gate: Arc<ConsentGate>,
        config: &Config,
    ) -> Self {
        let processor = Arc::new(CallProcessor::new(gate, slot.clone(), config.llm.max_tokens));
        let retry = RetryPolicy::new(deps.queue.clone(), config.worker.max_retries);
        let engine = HeartbeatActionEngine::new(
            deps.heartbeats.clone(),
            deps.queue.clone(),
            processor.clone(),
            retry.clone(),
            EngineLimits::from(&config.worker),
        );
        Self {
            deps,
            slot,
            processor,
            retry,
            engine,
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        refresh_backend(self.deps.settings.as_ref(), &self.slot).await;

        if self.deps.heartbeats.is_agent_terminated().await? {
            report.terminated = true;
            return Ok(report);
        }

        if self.deps.heartbeats.should_run_heartbeat().await? {
            report.heartbeat_started = self.deps.heartbeats.start_heartbeat().await?;
            if let Some(id) = &report.heartbeat_started {
                tracing::info!(heartbeat_id = %id, "heartbeat started");
            }
        }

        let Some(item) = self.deps.queue.claim().await? else {
            return Ok(report);
        };
        tracing::info!(
            item_id = %item.id,
            call_type = %item.call_type,
            kind = item.think_kind().unwrap_or("-"),
            retry_count = item.retry_count,
            "work item claimed"
        );
        report.item_id = Some(item.id.clone());

        let outcome = self.processor.dispatch(&item).await;
        match self.retry.settle(&item, outcome).await? {
            Settlement::Apply(output) => {
                self.apply_output(&item, &output, &mut report).await?;
                report.disposition = Some(ItemDisposition::Completed);
            }
            Settlement::Requeued => report.disposition = Some(ItemDisposition::Requeued),
            Settlement::Failed { fallback } => {
                // A decision that could not be made still gets its safe default.
                if let Some((heartbeat_id, decision)) =
                    fallback.as_ref().and_then(heartbeat_decision)
                {
                    report.heartbeat = self.run_engine(None, &heartbeat_id, &decision).await;
                }
                report.disposition = Some(ItemDisposition::Failed);
            }
        }

        if matches!(report.heartbeat, Some(HeartbeatOutcome::Terminated)) {
            report.terminated = true;
        }
        Ok(report)
    }

    async fn apply_output(
        &self,
        item: &WorkItem,
        output: &Value,
        report: &mut TickReport,
    ) -> Result<()> {
        if let Some((heartbeat_id, decision)) = heartbeat_decision(output) {
            report.heartbeat = self.run_engine(Some(item), &heartbeat_id, &decision).await;
            return self.retry.complete(item, output).await;
        }
        if item.heartbeat_id.is_some() {
            // A nested call requeued out of its heartbeat and picked up here.
            let resolution = self.engine.persist_call_result(item, output).await?;
            report.terminated = signals_termination(&resolution);
            return Ok(());
        }
        self.retry.complete(item, output).await
    }

    /// Engine errors leave the heartbeat running for maintenance to halt;
    /// they never cost the item its computed output. `held` is the decision
    /// item while it is still `processing`.
    async fn run_engine(
        &self,
        held: Option<&WorkItem>,
        heartbeat_id: &str,
        decision: &Value,
    ) -> Option<HeartbeatOutcome> {
        let executed = match held {
            Some(item) => self.engine.execute_holding(item, heartbeat_id, decision).await,
            None => self.engine.execute(heartbeat_id, decision).await,
        };
        match executed {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(heartbeat_id, error = %e, "heartbeat execution failed");
                None
            }
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(poll_interval = ?self.poll_interval, "decision loop started");
        loop {
            match self.tick().await {
                Ok(report) if report.terminated => {
                    tracing::warn!("agent terminated; decision loop stopping");
                    break;
                }
                Ok(report) => {
                    if let (Some(item_id), Some(disposition)) = (&report.item_id, report.disposition) {
                        tracing::debug!(item_id = %item_id, %disposition, "decision tick finished");
                    }
                }
                Err(e) => tracing::error!(error = %e, "decision tick failed"),
            }
            if wait_or_stop(self.poll_interval, &mut shutdown).await {
                break;
            }
        }
        tracing::info!("decision loop stopped");
    }
}
