use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use alert_dispatcher::config;
use alert_dispatcher::db::{self, SqliteAlertStore};
use alert_dispatcher::dispatch::{DispatchOptions, Dispatcher};
use alert_dispatcher::push::PushClient;
use alert_dispatcher::trigger::{self, Shutdown, SingleFlight};

#[derive(Debug, Parser)]
#[command(author, version, about = "Push due alerts and mark them sent")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run a single dispatch, log the summary and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(SqliteAlertStore::new(pool.clone()));
    let notifier = Arc::new(PushClient::from_config(&cfg)?);
    let dispatcher = Dispatcher::new(store, notifier, DispatchOptions::from_config(&cfg));
    let runs = SingleFlight::new(Arc::new(dispatcher));

    if args.once {
        let summary = runs.run().await.context("dispatch run failed")?;
        let pending = db::count_pending(&pool).await?;
        info!(?summary, pending, "single dispatch run finished");
        return Ok(());
    }

    let shutdown: Shutdown = Box::pin(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    });

    let trigger = trigger::from_config(&cfg)?;
    info!(mode = ?cfg.trigger.mode, "starting alert dispatcher");
    trigger.serve(runs, shutdown).await
}
