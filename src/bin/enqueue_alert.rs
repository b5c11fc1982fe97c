use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use alert_dispatcher::config;
use alert_dispatcher::db::{self, NewAlert};

#[derive(Debug, Parser)]
#[command(author, version, about = "Schedule one alert in the local alert store")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Notification title
    #[arg(long)]
    title: String,

    /// Notification body
    #[arg(long, default_value = "")]
    body: String,

    /// Push device token; omit to schedule an alert with no destination
    #[arg(long)]
    token: Option<String>,

    /// Seconds from now until the alert is due (negative values backdate it)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    in_seconds: i64,
}

/// `now` shifted by `seconds`, rejecting offsets chrono cannot represent.
fn due_in(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>> {
    Duration::try_seconds(seconds)
        .and_then(|offset| now.checked_add_signed(offset))
        .with_context(|| format!("--in-seconds {seconds} is out of range"))
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

    let alert = NewAlert {
        due_at: due_in(Utc::now(), args.in_seconds)?,
        device_token: args.token,
        title: args.title,
        body: args.body,
    };
    let id = db::insert_alert(&pool, &alert).await?;
    let pending = db::count_pending(&pool).await?;
    info!(alert_id = %id, due_at = %alert.due_at, pending, "alert scheduled");
    Ok(())
}
