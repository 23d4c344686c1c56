//! Environment-driven configuration.
//!
//! Every knob comes from the process environment; `dotenvy` loads a local
//! `.env` first in development. Validation happens once at startup and
//! the resulting [`Config`] is read-only afterwards.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::warn;

use crate::content::EventKind;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("invalid transform kind '{0}'")]
    InvalidTransformKind(String),

    #[error("invalid event kind '{0}'")]
    InvalidEventKind(String),

    #[error("kafka tls requires both KAFKA_TLS_CERT and KAFKA_TLS_KEY")]
    PartialTls,
}

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Production,
    Development,
    Staging,
    Testing,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Production => "production",
            AppEnv::Development => "development",
            AppEnv::Staging => "staging",
            AppEnv::Testing => "testing",
        }
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_lowercase).as_deref() {
            Some("production") => AppEnv::Production,
            Some("development") => AppEnv::Development,
            Some("staging") => AppEnv::Staging,
            Some("testing") => AppEnv::Testing,
            other => {
                warn!(environment = ?other, "Invalid or unset environment, using testing");
                AppEnv::Testing
            }
        }
    }
}

/// Which transform renders artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Ravenpack,
    Default,
}

impl TransformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformKind::Ravenpack => "ravenpack",
            TransformKind::Default => "default",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_build: String,
    pub env: AppEnv,
    pub debug: bool,
    pub listen_host: String,
    pub listen_port: String,
    pub redis_url: String,
    pub transform: TransformConfig,
    pub kafka: KafkaConfig,
    pub ftp: FtpConfig,
}

#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub kind: TransformKind,

    /// Event kinds the worker delivers; everything else is rejected.
    pub accepted_kinds: Vec<EventKind>,

    /// Events whose content was last updated outside this bound are
    /// dropped with a labeled reason.
    pub ignore_updated_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub ca_path: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub path: String,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
    pub send_retries: u32,
}

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env(app_build: impl Into<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(app_build, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        app_build: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            match lookup(name) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(ConfigError::Missing(name)),
            }
        };
        let optional = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let kind = match required("PROCESSOR")?.to_lowercase().as_str() {
            "ravenpack" => TransformKind::Ravenpack,
            "default" => TransformKind::Default,
            other => return Err(ConfigError::InvalidTransformKind(other.to_string())),
        };

        let mut accepted_kinds = Vec::new();
        for raw in required("PROCESSOR_EVENTS")?.split(',') {
            match EventKind::parse(raw.trim()) {
                Some(kind) => accepted_kinds.push(kind),
                None => return Err(ConfigError::InvalidEventKind(raw.trim().to_string())),
            }
        }

        let ignore_updated_before = match optional("IGNORE_UPDATED_BEFORE") {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| ConfigError::Invalid {
                        name: "IGNORE_UPDATED_BEFORE",
                        reason: e.to_string(),
                    })?,
            ),
            None => None,
        };

        let username = optional("KAFKA_USERNAME");
        let password = optional("KAFKA_PASSWORD");
        if username.is_some() != password.is_some() {
            warn!("Kafka username and password must both be set for scram auth, ignoring");
        }

        let ca_path = optional("KAFKA_TLS_CA");
        let cert_path = optional("KAFKA_TLS_CERT");
        let key_path = optional("KAFKA_TLS_KEY");
        if cert_path.is_some() != key_path.is_some() {
            return Err(ConfigError::PartialTls);
        }
        let tls = if ca_path.is_some() || cert_path.is_some() {
            Some(TlsConfig {
                ca_path,
                cert_path,
                key_path,
            })
        } else {
            None
        };

        let seconds = |name: &'static str| -> Result<Option<u64>, ConfigError> {
            match optional(name) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| ConfigError::Invalid {
                        name,
                        reason: e.to_string(),
                    }),
                None => Ok(None),
            }
        };

        let connect_timeout = seconds("FTP_CONNECT_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let keepalive_interval = seconds("FTP_KEEPALIVE_INTERVAL")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let send_retries = seconds("FTP_SEND_RETRIES")?.unwrap_or(0) as u32;

        Ok(Config {
            app_build: app_build.into(),
            env: AppEnv::parse(optional("ENVIRONMENT").as_deref()),
            debug: matches!(
                optional("DEBUG").map(|v| v.to_lowercase()).as_deref(),
                Some("1") | Some("t") | Some("true")
            ),
            listen_host: required("LISTEN_HOST")?,
            listen_port: required("LISTEN_PORT")?,
            redis_url: required("REDIS_URL")?,
            transform: TransformConfig {
                kind,
                accepted_kinds,
                ignore_updated_before,
            },
            kafka: KafkaConfig {
                brokers: required("KAFKA_BROKERS")?
                    .split(',')
                    .map(|b| b.trim().to_string())
                    .collect(),
                topic: required("KAFKA_TOPIC")?,
                group_id: required("KAFKA_GROUP_ID")?,
                username,
                password,
                tls,
            },
            ftp: FtpConfig {
                host: required("FTP_HOST")?,
                path: required("FTP_PATH")?,
                username: optional("FTP_USERNAME").unwrap_or_default(),
                password: optional("FTP_PASSWORD").unwrap_or_default(),
                connect_timeout,
                keepalive_interval,
                send_retries,
            },
        })
    }

    /// Listen address for the liveness HTTP server.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

impl KafkaConfig {
    /// Shared rdkafka client settings: brokers plus scram and tls when
    /// configured. Consumer and producer layer their own settings on top.
    pub fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", self.brokers.join(","));

        let scram = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        };

        match (&scram, &self.tls) {
            (Some(_), Some(_)) => {
                client.set("security.protocol", "SASL_SSL");
            }
            (Some(_), None) => {
                client.set("security.protocol", "SASL_PLAINTEXT");
            }
            (None, Some(_)) => {
                client.set("security.protocol", "SSL");
            }
            (None, None) => {}
        }

        if let Some((username, password)) = scram {
            client
                .set("sasl.mechanisms", "SCRAM-SHA-256")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        if let Some(tls) = &self.tls {
            if let Some(ca) = &tls.ca_path {
                client.set("ssl.ca.location", ca);
            }
            if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
                client
                    .set("ssl.certificate.location", cert)
                    .set("ssl.key.location", key);
            }
        }

        client
    }
}
