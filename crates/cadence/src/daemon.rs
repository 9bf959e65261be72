//! Daemon command: wires the store, publisher and scheduler together.

use std::path::PathBuf;
use std::sync::Arc;

use cadence_publisher::{
    BrowserPublisher, CommandTransform, MediaFetcher, MediaPipeline, MediaTransform, Passthrough,
};
use cadence_scheduler::{AccountDirectory, PurgeMode, Scheduler, SchedulerConfig, purge_dir};
use cadence_store::TableClient;
use miette::{IntoDiagnostic, Result};
use tokio::sync::watch;
use tracing::{info, warn};

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub store_url: String,
    pub store_api_key: String,
    pub store_base: String,
    pub store_table: String,
    pub accounts_path: PathBuf,
    pub launcher_url: String,
    pub agent_url: String,
    /// External media transform; media is published unchanged when unset.
    pub media_command: Option<PathBuf>,
    pub media_args: Vec<String>,
    pub scheduler: SchedulerConfig,
}

impl DaemonConfig {
    fn media_pipeline(&self) -> MediaPipeline {
        let transform: Arc<dyn MediaTransform> = match &self.media_command {
            Some(program) => Arc::new(CommandTransform::new(program, self.media_args.clone())),
            None => Arc::new(Passthrough),
        };
        MediaPipeline::new(MediaFetcher::new(&self.scheduler.work_dir), transform)
    }
}

/// Clear leftovers from a previous run out of the working directory.
async fn prepare_work_dir(config: &SchedulerConfig) -> Result<()> {
    let removed = purge_dir(&config.work_dir, PurgeMode::Everything)
        .await
        .map_err(|e| {
            miette::miette!(
                "cannot prepare working directory {}: {}",
                config.work_dir.display(),
                e
            )
        })?;
    info!(dir = %config.work_dir.display(), removed, "working directory cleared");
    Ok(())
}

/// Run the daemon until Ctrl-C.
pub async fn run(config: DaemonConfig) -> Result<()> {
    info!("starting Cadence daemon");

    let accounts = AccountDirectory::load(&config.accounts_path).into_diagnostic()?;
    if accounts.is_empty() {
        warn!(
            path = %config.accounts_path.display(),
            "no accounts configured, every due record will be skipped"
        );
    }
    info!(
        accounts = accounts.len(),
        names = ?accounts.names().collect::<Vec<_>>(),
        "loaded accounts"
    );

    prepare_work_dir(&config.scheduler).await?;

    let store = Arc::new(TableClient::new(
        &config.store_url,
        &config.store_api_key,
        &config.store_base,
        &config.store_table,
    ));
    let publisher = Arc::new(BrowserPublisher::new(&config.launcher_url, &config.agent_url));
    let media = config.media_pipeline();

    info!(
        store = %config.store_url,
        table = %config.store_table,
        launcher = %config.launcher_url,
        agent = %config.agent_url,
        zone = %config.scheduler.record_zone,
        "collaborators configured"
    );

    let scheduler = Scheduler::new(config.scheduler, store, publisher, accounts, Some(media));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    scheduler.run(shutdown_rx).await;

    info!("Cadence daemon stopped");
    Ok(())
}
