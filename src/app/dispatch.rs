use super::cli::{Cli, Commands, RunMode};
use super::status::{StatusSnapshot, render_status};
use crate::broker;
use crate::config::Config;
use crate::consent::ConsentGate;
use crate::llm::BackendSlot;
use crate::store::{BackendSettingsStore, ConsentStore, HeartbeatStore, SqliteStore, WorkQueue};
use crate::worker::{DecisionWorker, MaintenanceWorker, WorkerDeps};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let store = Arc::new(
        SqliteStore::open(&config.database)
            .await?
            .with_batch_size(config.worker.heartbeat_batch_size),
    );

    match cli.command {
        Commands::Run { mode } => run(&store, &config, mode).await,
        Commands::Status => {
            let snapshot = snapshot(&store).await?;
            println!("{}", render_status(&config, &snapshot));
            Ok(())
        }
        Commands::Enqueue {
            call_type,
            input,
            heartbeat_id,
        } => {
            let input: Value =
                serde_json::from_str(&input).context("work item input must be valid JSON")?;
            let item = store
                .enqueue(&call_type, &input, heartbeat_id.as_deref())
                .await?;
            println!("{}", item.id);
            Ok(())
        }
    }
}

async fn snapshot(store: &SqliteStore) -> Result<StatusSnapshot> {
    Ok(StatusSnapshot {
        counts: store.counts().await?,
        consent: store.consent_status().await?,
        terminated: store.is_agent_terminated().await?,
        stored_backend: store
            .backend_settings()
            .await?
            .map(|llm| (llm.provider, llm.model)),
    })
}

/// Run the requested loops until a stop signal or agent termination.
async fn run(store: &Arc<SqliteStore>, config: &Config, mode: RunMode) -> Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let deps = WorkerDeps::sqlite(store);
    let mut loops: Vec<JoinHandle<()>> = Vec::new();

    // One gate for the whole process; it asks through the first loop's slot.
    let decision_slot = Arc::new(BackendSlot::new(&config.llm));
    let maintenance_slot = Arc::new(BackendSlot::new(&config.llm));
    let gate_slot = if mode.runs_decision() {
        decision_slot.clone()
    } else {
        maintenance_slot.clone()
    };
    let gate = Arc::new(ConsentGate::new(deps.consent.clone(), gate_slot));

    if mode.runs_decision() {
        let worker = DecisionWorker::new(deps.clone(), decision_slot, gate.clone(), config);
        let rx = stop_rx.clone();
        loops.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    if mode.runs_maintenance() {
        let worker = MaintenanceWorker::new(
            deps,
            maintenance_slot,
            gate,
            broker::connect(&config.bridge),
            config,
        );
        let rx = stop_rx.clone();
        loops.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    tracing::info!(?mode, database = %config.database.path.display(), "cortexd running");

    let signal = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("stop requested; finishing in-flight work");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for ctrl-c; run until terminated");
                std::future::pending::<()>().await;
            }
        }
    });

    for handle in loops {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "worker loop aborted");
        }
    }
    signal.abort();
    Ok(())
}
