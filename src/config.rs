//! Configuration loader and validator for the alert dispatcher.
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub dispatch: Dispatch,
    pub trigger: Trigger,
    pub push: Push,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Tunables for a single dispatch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispatch {
    /// Maximum number of push sends in flight at once.
    pub concurrency: usize,
    pub send_timeout_ms: u64,
    /// Outer bound for the send phase of a run. Whatever finished by then is committed.
    pub run_deadline_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Timer,
    Request,
}

/// How dispatch runs get started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    pub mode: TriggerMode,
    pub interval_seconds: u64,
    pub listen: String,
}

/// Push service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Push {
    pub endpoint: String,
    pub server_key: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}/alerts.db", self.app.data_dir.trim_end_matches('/'))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.send_timeout_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.dispatch.run_deadline_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.trigger.interval_seconds)
    }

    /// Parsed listen address; `validate` guarantees this succeeds for loaded configs.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.trigger
            .listen
            .parse()
            .map_err(|_| ConfigError::Invalid("trigger.listen must be a socket address"))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.dispatch.concurrency == 0 {
        return Err(ConfigError::Invalid("dispatch.concurrency must be > 0"));
    }
    if cfg.dispatch.send_timeout_ms == 0 {
        return Err(ConfigError::Invalid("dispatch.send_timeout_ms must be > 0"));
    }
    if cfg.dispatch.run_deadline_seconds == 0 {
        return Err(ConfigError::Invalid("dispatch.run_deadline_seconds must be > 0"));
    }

    match cfg.trigger.mode {
        TriggerMode::Timer if cfg.trigger.interval_seconds == 0 => {
            return Err(ConfigError::Invalid("trigger.interval_seconds must be > 0"));
        }
        TriggerMode::Request => {
            cfg.listen_addr()?;
        }
        _ => {}
    }

    if cfg.push.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("push.endpoint must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.push.endpoint).is_err() {
        return Err(ConfigError::Invalid("push.endpoint must be an absolute URL"));
    }
    if cfg.push.server_key.trim().is_empty() {
        return Err(ConfigError::Invalid("push.server_key must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

dispatch:
  concurrency: 8
  send_timeout_ms: 10000
  run_deadline_seconds: 120

trigger:
  # "timer" runs every interval_seconds; "request" serves POST /dispatch on listen
  mode: timer
  interval_seconds: 60
  listen: "127.0.0.1:8088"

push:
  endpoint: "https://fcm.googleapis.com/fcm/send"
  server_key: "YOUR_PUSH_SERVER_KEY"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.trigger.mode, TriggerMode::Timer);
        assert_eq!(cfg.send_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn invalid_dispatch_tunables() {
        let mut cfg = example_cfg();
        cfg.dispatch.concurrency = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("concurrency")), _ => panic!("wrong error") }

        let mut cfg = example_cfg();
        cfg.dispatch.send_timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.dispatch.run_deadline_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn trigger_checks_depend_on_mode() {
        let mut cfg = example_cfg();
        cfg.trigger.interval_seconds = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("interval_seconds")), _ => panic!("wrong error") }

        // interval is irrelevant for request mode, but listen must parse
        cfg.trigger.mode = TriggerMode::Request;
        validate(&cfg).unwrap();
        cfg.trigger.listen = "not-an-address".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("trigger.listen")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_push_settings() {
        let mut cfg = example_cfg();
        cfg.push.server_key = "  ".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("push.server_key")), _ => panic!("wrong error") }

        let mut cfg = example_cfg();
        cfg.push.endpoint = "relative/path".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("push.endpoint")), _ => panic!("wrong error") }
    }

    #[test]
    fn mode_parses_lowercase() {
        let yaml = example().replace("mode: timer", "mode: request");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.trigger.mode, TriggerMode::Request);
        assert_eq!(cfg.listen_addr().unwrap().port(), 8088);
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert!(cfg.database_url().ends_with("/data/alerts.db"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.dispatch.concurrency, 8);
    }
}
