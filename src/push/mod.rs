use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::push::model::{PushMessage, PushNotification, PushResponse};

pub mod model;

/// Result entries that mean the destination itself is bad.
const TOKEN_ERRORS: [&str; 3] = ["InvalidRegistration", "NotRegistered", "MissingRegistration"];

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("device token rejected by push service")]
    InvalidToken,
    #[error("push transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("push service rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("push quota exceeded: {0}")]
    Quota(String),
    #[error("push send timed out after {0:?}")]
    Timeout(Duration),
}

/// Sends one push notification. Calls are independent of each other.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), DeliveryError>;
}

/// HTTP push client speaking the legacy FCM send API.
#[derive(Clone)]
pub struct PushClient {
    http: Client,
    endpoint: Url,
    server_key: String,
}

impl fmt::Debug for PushClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl PushClient {
    pub fn new(endpoint: Url, server_key: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("alert-dispatcher/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .context("failed to build push http client")?;
        Ok(Self {
            http,
            endpoint,
            server_key,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let endpoint = Url::parse(&cfg.push.endpoint).context("invalid push endpoint")?;
        Self::new(endpoint, cfg.push.server_key.clone())
    }

    pub fn build_request(&self, token: &str, title: &str, body: &str) -> Result<reqwest::Request, DeliveryError> {
        let message = PushMessage {
            to: token,
            notification: PushNotification { title, body },
        };
        let request = self
            .http
            .post(self.endpoint.clone())
            .header("Authorization", format!("key={}", self.server_key))
            .header("Content-Type", "application/json")
            .json(&message)
            .build()?;
        Ok(request)
    }
}

/// Map a push endpoint reply onto a delivery result.
pub fn interpret_response(status: StatusCode, body: &str) -> Result<(), DeliveryError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(DeliveryError::Quota(body.to_string()));
    }
    if !status.is_success() {
        return Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    // Some deployments answer 200 with an empty body.
    let parsed: PushResponse = if body.trim().is_empty() {
        PushResponse::default()
    } else {
        serde_json::from_str(body).map_err(|_| DeliveryError::Rejected {
            status: status.as_u16(),
            body: body.to_string(),
        })?
    };
    let first_error = parsed.results.iter().find_map(|r| r.error.as_deref());
    match first_error {
        Some(err) if TOKEN_ERRORS.contains(&err) => Err(DeliveryError::InvalidToken),
        Some(err) => Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body: err.to_string(),
        }),
        None if parsed.failure > 0 => Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body: body.to_string(),
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl Notifier for PushClient {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), DeliveryError> {
        let request = self.build_request(token, title, body)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        let text = res.text().await?;
        debug!(%status, "push endpoint replied");
        interpret_response(status, &text)
    }
}
