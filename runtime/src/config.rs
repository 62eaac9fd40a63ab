use std::{
    env, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::{
    bus::BatchConfig,
    pipeline::{BatchSettings, RetryPolicy, Topics},
};

pub const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

pub const ENV_CONFIG_PATH: &str = "APP_CONFIG_PATH";
pub const ENV_METADATA_TABLE: &str = "METADATA_TABLE";
pub const ENV_PROCESSED_BUCKET: &str = "PROCESSED_BUCKET";
pub const ENV_INTERNAL_TOPIC: &str = "INTERNAL_TOPIC_ARN";
pub const ENV_USER_NOTIFICATION_TOPIC: &str = "USER_NOTIFICATION_TOPIC_ARN";
pub const ENV_WORKSPACE: &str = "WORKSPACE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration `{key}` (set {env_var} or `{key}` in the config file)")]
    Missing {
        key: &'static str,
        env_var: &'static str,
    },

    #[error("failed to read config file at {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to parse config file at {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub max_batch_size: usize,
    pub max_linger_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        let defaults = BatchConfig::default();
        Self {
            max_batch_size: defaults.max_batch_size,
            max_linger_ms: defaults.max_linger.as_millis() as u64,
        }
    }
}

impl From<&BusSettings> for BatchConfig {
    fn from(settings: &BusSettings) -> Self {
        BatchConfig {
            max_batch_size: settings.max_batch_size.max(1),
            max_linger: Duration::from_millis(settings.max_linger_ms),
        }
    }
}

/// The config file as written. The four deployment identifiers are
/// optional here because the environment may supply them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub server: ServerConfig,
    pub working_dir: String,
    pub workspace: Option<String>,
    pub upload_bucket: String,
    pub metadata_table: Option<String>,
    pub processed_bucket: Option<String>,
    pub internal_topic: Option<String>,
    pub user_notification_topic: Option<String>,
    pub bus: BusSettings,
    pub batch: BatchSettings,
    pub retry: RetryPolicy,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            working_dir: "data".into(),
            workspace: None,
            upload_bucket: "uploads".into(),
            metadata_table: None,
            processed_bucket: None,
            internal_topic: None,
            user_notification_topic: None,
            bus: BusSettings::default(),
            batch: BatchSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Fully resolved configuration. Every required identifier is present.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub working_dir: PathBuf,
    pub workspace: Option<String>,
    pub upload_bucket: String,
    pub metadata_table: String,
    pub processed_bucket: String,
    pub topics: Topics,
    pub bus: BatchConfig,
    pub batch: BatchSettings,
    pub retry: RetryPolicy,
}

impl AppConfig {
    /// Reads the config file, applies the process environment and resolves.
    pub async fn load() -> Result<Self, ConfigError> {
        let raw = read_raw(&config_path()).await?;
        Self::resolve(raw, |key| env::var(key).ok())
    }

    /// Merges `raw` with values from `lookup`; the environment wins.
    pub fn resolve(
        raw: RawConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let pick = |file_value: Option<String>, key: &'static str, env_var: &'static str| {
            non_empty(lookup(env_var))
                .or_else(|| non_empty(file_value))
                .ok_or(ConfigError::Missing { key, env_var })
        };

        let metadata_table = pick(raw.metadata_table, "metadata_table", ENV_METADATA_TABLE)?;
        let processed_bucket =
            pick(raw.processed_bucket, "processed_bucket", ENV_PROCESSED_BUCKET)?;
        let internal = pick(raw.internal_topic, "internal_topic", ENV_INTERNAL_TOPIC)?;
        let user_notification = pick(
            raw.user_notification_topic,
            "user_notification_topic",
            ENV_USER_NOTIFICATION_TOPIC,
        )?;
        let workspace = non_empty(lookup(ENV_WORKSPACE)).or_else(|| non_empty(raw.workspace));
        raw.retry
            .validate()
            .map_err(|reason| ConfigError::Invalid { key: "retry", reason })?;

        Ok(Self {
            server: raw.server,
            working_dir: PathBuf::from(raw.working_dir),
            workspace,
            upload_bucket: raw.upload_bucket,
            metadata_table,
            processed_bucket,
            topics: Topics {
                internal,
                user_notification,
            },
            bus: BatchConfig::from(&raw.bus),
            batch: raw.batch,
            retry: raw.retry,
        })
    }
}

pub fn config_path() -> PathBuf {
    env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// A missing file is not an error: the environment alone may carry the
/// required values.
async fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(RawConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let raw = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "configuration loaded from disk");
    Ok(raw)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
