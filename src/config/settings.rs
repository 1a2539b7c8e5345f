use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

use crate::error::{ClientError, Result};
use crate::reconnect::BackoffConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub tail: TailConfig,
}

/// Connection target and timing for the event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Event-stream base address (`ws://` or `wss://`)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Path appended to the endpoint
    #[serde(default = "default_path")]
    pub path: String,
    /// Transport connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Application-level ping interval in seconds (0 disables keepalive)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Outbound frame buffer per transport
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(default)]
    pub jitter_factor: f64,
    /// Reconnect attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    /// Fallback filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Settings used only by the `notify-tail` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct TailConfig {
    pub token: Option<String>,
    #[serde(default = "default_event_types")]
    pub event_types: Vec<String>,
}

fn default_endpoint() -> String {
    "ws://localhost:8000".to_string()
}

fn default_path() -> String {
    "/ws".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    32
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_types() -> Vec<String> {
    vec![
        "claim_status".to_string(),
        "rodtep_update".to_string(),
        "document_processed".to_string(),
        "notification".to_string(),
    ]
}

impl Settings {
    pub fn new() -> std::result::Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("client.endpoint", default_endpoint())?
            .set_default("client.path", default_path())?
            .set_default("telemetry.log_level", default_log_level())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // NOTIFY_CLIENT__ENDPOINT, NOTIFY_CLIENT__RECONNECT__MAX_ATTEMPTS, NOTIFY_TAIL__TOKEN, ...
            .add_source(
                Environment::with_prefix("NOTIFY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("tail.event_types"),
            );

        builder.build()?.try_deserialize()
    }
}

impl ClientConfig {
    /// Check the endpoint and reconnect parameters.
    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;
        self.reconnect.validate()
    }

    /// Endpoint with `path` joined, without the credential.
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{}: {}", self.endpoint, e)))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ClientError::InvalidEndpoint(format!(
                    "unsupported scheme '{}', expected ws or wss",
                    other
                )))
            }
        }

        if !self.path.is_empty() {
            let joined = format!(
                "{}/{}",
                url.path().trim_end_matches('/'),
                self.path.trim_start_matches('/')
            );
            url.set_path(&joined);
        }

        Ok(url)
    }

    /// Full connection URL with the credential attached as the `token` parameter.
    pub fn connection_url(&self, credential: &str) -> Result<Url> {
        Ok(with_credential(&self.endpoint_url()?, credential))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// `None` when keepalive is disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval > 0).then(|| Duration::from_secs(self.heartbeat_interval))
    }
}

pub(crate) fn with_credential(base: &Url, credential: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair("token", credential);
    url
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 {
            return Err(ClientError::Config(ConfigError::Message(format!(
                "reconnect.multiplier must be >= 1.0, got {}",
                self.multiplier
            ))));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ClientError::Config(ConfigError::Message(format!(
                "reconnect.jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            ))));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            multiplier: self.multiplier,
            jitter_factor: self.jitter_factor,
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            path: default_path(),
            connect_timeout: default_connect_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
            outbound_buffer: default_outbound_buffer(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: 0.0,
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            token: None,
            event_types: default_event_types(),
        }
    }
}
