use super::model::AlertRow;
use super::{AlertStore, StoreError};
use crate::model::{AlertId, AlertRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

/// Ids bound per `UPDATE`, kept well under SQLite's host parameter limit.
const MARK_CHUNK: usize = 500;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL and stricter durability; the sent marks must survive a crash once committed.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    // Every connection to an in-memory database is a separate database.
    let max_connections = if normalized.starts_with("sqlite::memory") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            // a missing directory surfaces as a connect error right after
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fields needed to schedule a new alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub due_at: DateTime<Utc>,
    pub device_token: Option<String>,
    pub title: String,
    pub body: String,
}

#[instrument(skip_all)]
pub async fn insert_alert(pool: &Pool, alert: &NewAlert) -> Result<AlertId, StoreError> {
    let id = AlertId::generate();
    sqlx::query(
        "INSERT INTO alerts (id, due_at, sent, device_token, title, body) VALUES (?, ?, 0, ?, ?, ?)",
    )
    .bind(id.as_str())
    .bind(alert.due_at.timestamp_millis())
    .bind(alert.device_token.as_deref())
    .bind(&alert.title)
    .bind(&alert.body)
    .execute(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn fetch_alert(pool: &Pool, id: &AlertId) -> Result<Option<AlertRecord>, StoreError> {
    let row = sqlx::query_as::<_, AlertRow>(
        "SELECT id, due_at, sent, device_token, title, body FROM alerts WHERE id = ?",
    )
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;
    row.map(AlertRecord::try_from).transpose()
}

/// Unsent alerts, due or not.
#[instrument(skip_all)]
pub async fn count_pending(pool: &Pool) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE sent = 0")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn list_due_alerts(pool: &Pool, now: DateTime<Utc>) -> Result<Vec<AlertRecord>, StoreError> {
    let rows = sqlx::query_as::<_, AlertRow>(
        "SELECT id, due_at, sent, device_token, title, body FROM alerts \
         WHERE sent = 0 AND due_at <= ? ORDER BY due_at ASC, id ASC",
    )
    .bind(now.timestamp_millis())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(AlertRecord::try_from).collect()
}

#[instrument(skip_all, fields(count = ids.len()))]
pub async fn mark_alerts_sent(pool: &Pool, ids: &BTreeSet<AlertId>) -> Result<u64, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sent_at = Utc::now().timestamp_millis();
    let ids: Vec<&AlertId> = ids.iter().collect();
    let mut tx = pool.begin().await?;
    let mut marked = 0;
    // Dropping `tx` on an early return rolls back every chunk already applied.
    for chunk in ids.chunks(MARK_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE alerts SET sent = 1, sent_at = ");
        qb.push_bind(sent_at);
        qb.push(" WHERE sent = 0 AND id IN (");
        let mut list = qb.separated(", ");
        for id in chunk {
            list.push_bind(id.as_str());
        }
        list.push_unseparated(")");
        marked += qb.build().execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    debug!(marked, "sent marks committed");
    Ok(marked)
}

/// [`AlertStore`] backed by the SQLite `alerts` table.
#[derive(Debug, Clone)]
pub struct SqliteAlertStore {
    pool: Pool,
}

impl SqliteAlertStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    async fn query_due(&self, now: DateTime<Utc>) -> Result<Vec<AlertRecord>, StoreError> {
        list_due_alerts(&self.pool, now).await
    }

    async fn commit_marks(&self, ids: &BTreeSet<AlertId>) -> Result<u64, StoreError> {
        mark_alerts_sent(&self.pool, ids).await
    }
}
