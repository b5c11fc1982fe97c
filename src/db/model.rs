//! Row shapes used by the SQLite repository.
//!
//! Keep these structs focused on what the queries return; conversion into
//! domain types happens here so the repository stays SQL-only.

use chrono::{DateTime, Utc};

use super::StoreError;
use crate::model::{AlertId, AlertRecord};

/// One row of the `alerts` table as selected by the due-alert query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRow {
    pub id: String,
    pub due_at: i64,
    pub sent: bool,
    pub device_token: Option<String>,
    pub title: String,
    pub body: String,
}

impl TryFrom<AlertRow> for AlertRecord {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let due_at = DateTime::<Utc>::from_timestamp_millis(row.due_at).ok_or_else(|| {
            StoreError::Corrupt {
                id: row.id.clone(),
                reason: "due_at out of range",
            }
        })?;
        Ok(AlertRecord {
            id: AlertId::new(row.id),
            due_at,
            sent: row.sent,
            device_token: row.device_token,
            title: row.title,
            body: row.body,
        })
    }
}
