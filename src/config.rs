use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub keepalive: KeepaliveConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Control-plane HTTP API.
    pub http_port: u16,
    /// Subscriber WebSocket listener.
    pub ws_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8000,
            ws_port: 8001,
        }
    }
}

impl ServerConfig {
    pub fn http_bind(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn ws_bind(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KeepaliveConfig {
    #[serde(alias = "pingIntervalSecs")]
    pub ping_interval_secs: u64,
    #[serde(alias = "idleTimeoutSecs")]
    pub idle_timeout_secs: u64,
    #[serde(alias = "sendTimeoutMs")]
    pub send_timeout_ms: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 20,
            idle_timeout_secs: 60,
            send_timeout_ms: 5000,
        }
    }
}

impl KeepaliveConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Never shorter than one ping interval, otherwise a healthy peer would
    /// be dropped before it had a chance to answer.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs).max(self.ping_interval())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Control-plane secret, presented as `x-api-key`.
    #[serde(alias = "masterToken")]
    pub master_token: String,
    /// Subscriber identity -> secret.
    pub slaves: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let s = Config::builder()
            // 1. Global config from ~/.relay/config.{toml,json}
            .add_source(File::with_name(&format!("{}/.relay/config", home)).required(false))
            // 2. Project config
            .add_source(File::with_name("config/relay").required(false))
            // 3. Local overrides (not checked in)
            .add_source(File::with_name("config/local").required(false))
            // 4. Environment, e.g. RELAY_AUTH__SLAVES__ALPHA=secret
            .add_source(environment())
            .build()?;

        Self::from_config(s)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.try_deserialize()
    }
}

/// `RELAY_` variables with `__` nesting. Values stay strings so secrets such
/// as `007` are kept verbatim; numeric fields are converted on deserialize.
fn environment() -> Environment {
    Environment::with_prefix("RELAY")
        .prefix_separator("_")
        .separator("__")
}
