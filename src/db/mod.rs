//! Database module: the alert store seam and its SQLite implementation.
//!
//! - `model`: row shapes returned by queries and their mapping into domain types.
//! - `repo`: SQL-only functions plus [`SqliteAlertStore`].
//!
//! The dispatcher only talks to the [`AlertStore`] trait; tests swap in
//! in-memory fakes.

pub mod model;
pub mod repo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::{AlertId, AlertRecord};

pub use repo::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("alert {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: &'static str },
}

/// Persisted alert records, as seen by the dispatcher.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Every record with `due_at <= now` and `sent = false`, as a snapshot.
    async fn query_due(&self, now: DateTime<Utc>) -> Result<Vec<AlertRecord>, StoreError>;

    /// Mark every id as sent in one all-or-nothing write.
    ///
    /// Returns how many rows flipped from unsent to sent. Ids that were
    /// already sent are left alone and not counted.
    async fn commit_marks(&self, ids: &BTreeSet<AlertId>) -> Result<u64, StoreError>;
}
