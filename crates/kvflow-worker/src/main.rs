mod sim;

use anyhow::Result;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::sim::{SimConfig, Simulation};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "kvflow_worker=debug,kvflow_workflows=info,kvflow_storage=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }
    tracing::info!("kvflow-worker starting...");

    let config = SimConfig::from_env()?;
    tracing::info!(
        workers = config.workers,
        instances = config.instances,
        activities = config.activities_per_instance,
        root = %config.backend.root,
        "simulation configured"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, draining workers");
            let _ = stop_tx.send(true);
        }
    });

    let report = Simulation::new(config).run(stop_rx).await?;
    tracing::info!(
        workflow_tasks = report.workflow_tasks,
        activity_tasks = report.activity_tasks,
        removed = report.removed_instances,
        active = report.stats.active_workflow_instances,
        pending_activities = report.stats.pending_activity_tasks_total(),
        "simulation finished"
    );

    tracing::info!("Worker shutdown complete");
    Ok(())
}
