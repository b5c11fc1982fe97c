//! Ways to start a dispatch run: a periodic timer or an HTTP request.
//!
//! Both go through [`SingleFlight`], so runs started by one process never
//! overlap. Runs started by separate processes still can; the dispatcher
//! tolerates that as a bounded duplicate-notification risk.
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::BoxFuture;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::{Config, TriggerMode};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::model::DispatchSummary;

/// Resolves when the process should stop accepting new runs.
pub type Shutdown = BoxFuture<'static, ()>;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("a dispatch run is already in progress")]
    Busy,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("dispatch run task ended abnormally: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TriggerError::Busy => StatusCode::CONFLICT,
            TriggerError::Dispatch(_) | TriggerError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// At most one dispatch run in flight per process.
#[derive(Clone)]
pub struct SingleFlight {
    dispatcher: Arc<Dispatcher>,
    gate: Arc<Mutex<()>>,
}

impl SingleFlight {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Wait for any in-flight run to finish, then run.
    pub async fn run(&self) -> Result<DispatchSummary, DispatchError> {
        let _guard = self.gate.lock().await;
        self.dispatcher.execute().await
    }

    /// Run now, or fail with [`TriggerError::Busy`] if a run is in flight.
    pub async fn try_run(&self) -> Result<DispatchSummary, TriggerError> {
        let Ok(_guard) = self.gate.try_lock() else {
            return Err(TriggerError::Busy);
        };
        Ok(self.dispatcher.execute().await?)
    }
}

#[async_trait]
pub trait Trigger: Send + Sync {
    /// Start dispatch runs until `shutdown` resolves.
    async fn serve(&self, runs: SingleFlight, shutdown: Shutdown) -> Result<()>;
}

/// Select the trigger strategy named by `trigger.mode`.
pub fn from_config(cfg: &Config) -> Result<Box<dyn Trigger>> {
    let trigger: Box<dyn Trigger> = match cfg.trigger.mode {
        TriggerMode::Timer => Box::new(TimerTrigger::new(cfg.interval())),
        TriggerMode::Request => Box::new(RequestTrigger::new(cfg.listen_addr()?)),
    };
    Ok(trigger)
}

#[derive(Debug, Clone)]
pub struct TimerTrigger {
    interval: Duration,
}

impl TimerTrigger {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Trigger for TimerTrigger {
    async fn serve(&self, runs: SingleFlight, mut shutdown: Shutdown) -> Result<()> {
        info!(interval = ?self.interval, "timer trigger started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            // A run in progress finishes (and commits) before shutdown is observed.
            tokio::select! {
                _ = &mut shutdown => {
                    info!("timer trigger stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = runs.run().await {
                        error!(error = %err, "dispatch run failed; due alerts stay pending");
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestTrigger {
    addr: SocketAddr,
}

impl RequestTrigger {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

pub fn router(runs: SingleFlight) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dispatch", post(dispatch))
        .with_state(runs)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn dispatch(State(runs): State<SingleFlight>) -> Result<Json<DispatchSummary>, TriggerError> {
    // The run lives on its own task so a dropped connection cannot cancel it before the commit.
    let run = tokio::spawn(async move { runs.try_run().await });
    let result = match run.await {
        Ok(result) => result,
        Err(join) => Err(TriggerError::from(join)),
    };
    match result {
        Ok(summary) => Ok(Json(summary)),
        Err(TriggerError::Busy) => {
            warn!("dispatch requested while a run is in flight");
            Err(TriggerError::Busy)
        }
        Err(err) => {
            error!(error = %err, "dispatch run failed; due alerts stay pending");
            Err(err)
        }
    }
}

#[async_trait]
impl Trigger for RequestTrigger {
    async fn serve(&self, runs: SingleFlight, shutdown: Shutdown) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        info!(addr = %self.addr, "request trigger listening");
        axum::serve(listener, router(runs))
            .with_graceful_shutdown(shutdown)
            .await
            .context("request trigger server failed")?;
        info!("request trigger stopped");
        Ok(())
    }
}
