//! Runtime configuration: optional YAML file plus environment overrides.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use wagw_whatsapp::{GatewayConfig, Poll};

/// Default YAML file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "wa-gateway.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub messaging: MessagingConfig,
    pub relay: RelayConfig,
    pub ping: PingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Transient storage for multipart uploads.
    pub upload_dir: PathBuf,
    /// Static files, including the QR page.
    pub public_dir: PathBuf,
    pub body_limit_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            upload_dir: PathBuf::from("uploads"),
            public_dir: PathBuf::from("public"),
            body_limit_mb: 50,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "server.host",
                value: self.host.clone(),
            })
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessagingConfig {
    /// Pause after a successful text send before answering the client.
    pub send_ack_delay_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            send_ack_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    /// The only chat whose messages are forwarded.
    pub chat_id: String,
    pub target_url: String,
    /// Value sent as the `messageType` query parameter.
    pub message_type: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chat_id: "120363401688020574@g.us".into(),
            target_url: "http://localhost:5678/webhook/barber-salon-booking".into(),
            message_type: "text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PingConfig {
    pub enabled: bool,
    /// Chat receiving the poll and the extra `pong`; the relay chat if unset.
    pub chat_id: Option<String>,
    pub poll_question: String,
    pub poll_options: Vec<String>,
    pub allow_multiple_answers: bool,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chat_id: None,
            poll_question: "What’s your favorite color?".into(),
            poll_options: ["Red", "Green", "Blue", "Yellow"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_multiple_answers: false,
        }
    }
}

impl PingConfig {
    pub fn poll(&self) -> Poll {
        Poll {
            question: self.poll_question.clone(),
            options: self.poll_options.clone(),
            allow_multiple_answers: self.allow_multiple_answers,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Load from `WAGW_CONFIG` (or `wa-gateway.yaml` if it exists) and apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("WAGW_CONFIG").ok().filter(|p| !p.is_empty());
        let mut config = match explicit {
            Some(path) => Self::from_file(Path::new(&path))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PORT") {
            self.server.port = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("WAGW_UPLOAD_DIR") {
            self.server.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = get("WAGW_PUBLIC_DIR") {
            self.server.public_dir = PathBuf::from(v);
        }
        if let Some(v) = get("WAGW_GATEWAY_URL") {
            self.gateway.base_url = v;
        }
        if let Some(v) = get("WAGW_GATEWAY_API_KEY") {
            self.gateway.api_key = v;
        }
        if let Some(v) = get("WAGW_INSTANCE") {
            self.gateway.instance_name = v;
        }
        if let Some(v) = get("WAGW_RELAY_CHAT_ID") {
            self.relay.chat_id = v;
        }
        if let Some(v) = get("WAGW_RELAY_URL") {
            self.relay.target_url = v;
        }
        if let Some(v) = get("WAGW_LOG_FORMAT") {
            self.logging.format = match v.trim().to_ascii_lowercase().as_str() {
                "pretty" | "text" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "WAGW_LOG_FORMAT",
                        value: v,
                    })
                }
            };
        }
        Ok(())
    }

    /// Chat used by the `!ping` handler.
    pub fn ping_chat_id(&self) -> &str {
        self.ping.chat_id.as_deref().unwrap_or(&self.relay.chat_id)
    }
}
