use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::push::DeliveryError;

/// Opaque alert identifier, stable for the record's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted reminder waiting to be pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: AlertId,
    pub due_at: DateTime<Utc>,
    pub sent: bool,
    pub device_token: Option<String>,
    pub title: String,
    pub body: String,
}

impl AlertRecord {
    /// The push destination, if any. Blank tokens count as missing.
    pub fn device_token(&self) -> Option<&str> {
        self.device_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.sent && self.due_at <= now
    }
}

/// Why a processed alert was not delivered.
#[derive(Debug)]
pub enum OutcomeError {
    NoToken,
    Delivery(DeliveryError),
}

impl fmt::Display for OutcomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeError::NoToken => f.write_str("no device token"),
            OutcomeError::Delivery(err) => write!(f, "{err}"),
        }
    }
}

/// Per-record result of one run. Never persisted.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub record_id: AlertId,
    pub attempted: bool,
    pub delivered: bool,
    pub error: Option<OutcomeError>,
}

impl DispatchOutcome {
    pub fn delivered(record_id: AlertId) -> Self {
        Self {
            record_id,
            attempted: true,
            delivered: true,
            error: None,
        }
    }

    pub fn failed(record_id: AlertId, err: DeliveryError) -> Self {
        Self {
            record_id,
            attempted: true,
            delivered: false,
            error: Some(OutcomeError::Delivery(err)),
        }
    }

    pub fn skipped_no_token(record_id: AlertId) -> Self {
        Self {
            record_id,
            attempted: false,
            delivered: false,
            error: Some(OutcomeError::NoToken),
        }
    }
}

/// Counts reported for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub total: usize,
    pub delivered: usize,
    pub skipped_no_token: usize,
    pub delivery_failed: usize,
    /// Candidates whose send had not finished when the run deadline hit.
    pub deferred: usize,
    pub committed: usize,
}

impl DispatchSummary {
    /// Fold the collected outcomes of a run. `total` is the candidate count from the query.
    pub fn fold(total: usize, outcomes: &[DispatchOutcome], committed: usize) -> Self {
        let mut summary = DispatchSummary {
            total,
            committed,
            ..Default::default()
        };
        for outcome in outcomes {
            match (&outcome.error, outcome.delivered) {
                (_, true) => summary.delivered += 1,
                (Some(OutcomeError::NoToken), _) => summary.skipped_no_token += 1,
                _ => summary.delivery_failed += 1,
            }
        }
        summary.deferred = total.saturating_sub(outcomes.len());
        summary
    }
}
