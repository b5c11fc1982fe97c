//! One dispatch run: query due alerts, push them concurrently, commit sent marks.
//!
//! Delivery outcome and commit eligibility are separate. Every record the
//! run processed goes into the commit set, whether its push was delivered
//! or failed or was skipped for lack of a token. Only a store failure leaves
//! records unmarked, and the next run picks them up again.
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::db::{AlertStore, StoreError};
use crate::model::{AlertId, AlertRecord, DispatchOutcome, DispatchSummary};
use crate::push::{DeliveryError, Notifier};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to query due alerts: {0}")]
    StoreQuery(#[source] StoreError),
    #[error("failed to commit {count} sent marks: {source}")]
    StoreCommit {
        count: usize,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub concurrency: usize,
    pub send_timeout: Duration,
    pub run_deadline: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            send_timeout: Duration::from_secs(10),
            run_deadline: Duration::from_secs(120),
        }
    }
}

impl DispatchOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            concurrency: cfg.dispatch.concurrency,
            send_timeout: cfg.send_timeout(),
            run_deadline: cfg.run_deadline(),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            notifier,
            options,
        }
    }

    pub async fn execute(&self) -> Result<DispatchSummary, DispatchError> {
        self.execute_at(Utc::now()).await
    }

    /// Run once against the snapshot of alerts due at `now`.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn execute_at(&self, now: DateTime<Utc>) -> Result<DispatchSummary, DispatchError> {
        let candidates = self
            .store
            .query_due(now)
            .await
            .map_err(DispatchError::StoreQuery)?;
        if candidates.is_empty() {
            debug!("no due alerts");
            return Ok(DispatchSummary::default());
        }
        let total = candidates.len();
        info!(total, "dispatching due alerts");

        let (sendable, no_token): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|record| record.device_token().is_some());

        let mut outcomes: Vec<DispatchOutcome> = no_token
            .into_iter()
            .map(|record| {
                info!(alert_id = %record.id, "alert has no device token; marking processed");
                DispatchOutcome::skipped_no_token(record.id)
            })
            .collect();
        self.send_all(sendable, &mut outcomes).await;

        let commit_set: BTreeSet<AlertId> =
            outcomes.iter().map(|o| o.record_id.clone()).collect();
        let committed = if commit_set.is_empty() {
            0
        } else {
            let marked = self
                .store
                .commit_marks(&commit_set)
                .await
                .map_err(|source| DispatchError::StoreCommit {
                    count: commit_set.len(),
                    source,
                })?;
            if marked < commit_set.len() as u64 {
                warn!(
                    marked,
                    expected = commit_set.len(),
                    "some alerts were already marked sent by an overlapping run"
                );
            }
            commit_set.len()
        };

        let summary = DispatchSummary::fold(total, &outcomes, committed);
        info!(
            total = summary.total,
            delivered = summary.delivered,
            skipped_no_token = summary.skipped_no_token,
            delivery_failed = summary.delivery_failed,
            deferred = summary.deferred,
            committed = summary.committed,
            "dispatch run complete"
        );
        Ok(summary)
    }

    /// Push every record with bounded parallelism, appending one outcome per
    /// finished send. Returns once all sends finished or the run deadline hit;
    /// sends still in flight at the deadline are dropped and produce no outcome.
    async fn send_all(&self, records: Vec<AlertRecord>, outcomes: &mut Vec<DispatchOutcome>) {
        if records.is_empty() {
            return;
        }
        let notifier: &dyn Notifier = &*self.notifier;
        let send_timeout = self.options.send_timeout;
        let sends = stream::iter(records)
            .map(move |record| async move { deliver(notifier, record, send_timeout).await })
            .buffer_unordered(self.options.concurrency.max(1));
        tokio::pin!(sends);

        let deadline = tokio::time::sleep(self.options.run_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = sends.next() => match next {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        deadline = ?self.options.run_deadline,
                        finished = outcomes.len(),
                        "run deadline reached; committing collected outcomes"
                    );
                    break;
                }
            }
        }
    }
}

async fn deliver(notifier: &dyn Notifier, record: AlertRecord, send_timeout: Duration) -> DispatchOutcome {
    let Some(token) = record.device_token() else {
        return DispatchOutcome::skipped_no_token(record.id);
    };
    let result = tokio::time::timeout(send_timeout, notifier.send(token, &record.title, &record.body))
        .await
        .unwrap_or_else(|_| Err(DeliveryError::Timeout(send_timeout)));
    match result {
        Ok(()) => {
            debug!(alert_id = %record.id, "alert delivered");
            DispatchOutcome::delivered(record.id)
        }
        Err(err) => {
            warn!(alert_id = %record.id, error = %err, "alert delivery failed; marking processed");
            DispatchOutcome::failed(record.id, err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutcomeError;
    use async_trait::async_trait;

    struct Stalled;

    #[async_trait]
    impl Notifier for Stalled {
        async fn send(&self, _token: &str, _title: &str, _body: &str) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn record(token: Option<&str>) -> AlertRecord {
        AlertRecord {
            id: AlertId::new("a-1"),
            due_at: Utc::now(),
            sent: false,
            device_token: token.map(str::to_string),
            title: "t".into(),
            body: "b".into(),
        }
    }

    #[tokio::test]
    async fn deliver_times_out_per_send() {
        let outcome = deliver(&Stalled, record(Some("tok")), Duration::from_millis(20)).await;
        assert!(outcome.attempted);
        assert!(!outcome.delivered);
        assert!(matches!(
            outcome.error,
            Some(OutcomeError::Delivery(DeliveryError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn deliver_skips_blank_token() {
        let outcome = deliver(&Stalled, record(Some(" ")), Duration::from_millis(20)).await;
        assert!(!outcome.attempted);
        assert!(matches!(outcome.error, Some(OutcomeError::NoToken)));
    }
}
