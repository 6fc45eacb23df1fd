//! Core configuration and backend selection.
//!
//! # Responsibility
//! - Describe which store backend to open, the bucket layout, the SSO name
//!   allocator retry policy and logging settings.
//! - Open the configured backend as an injectable `Arc<dyn KvStore>`.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - Bucket names are non-blank and pairwise distinct.
//! - `allocator.max_attempts >= 1`.

use crate::kv::{KvResult, KvStore, MemoryKvStore, SqliteKvStore};
use crate::logging::{default_log_level, init_logging, LoggingError};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub store: StoreConfig,
    pub buckets: BucketNames,
    pub allocator: AllocatorPolicy,
    pub logging: LoggingConfig,
}

/// Store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BucketNames {
    pub committees: String,
    pub committee_settings: String,
    pub committee_members: String,
    pub projects: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            committees: "committees".to_string(),
            committee_settings: "committee-settings".to_string(),
            committee_members: "committee-members".to_string(),
            projects: "projects".to_string(),
        }
    }
}

/// Retry policy for SSO group name allocation under contention.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocatorPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AllocatorPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
        }
    }
}

impl AllocatorPolicy {
    /// Backoff after failed attempt `attempt` (1-based): doubles from
    /// `initial_backoff_ms`, capped at `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `trace|debug|info|warn|error`; build-mode default when unset.
    pub level: Option<String>,
    /// Absolute directory for rolling log files; logging stays off when unset.
    pub dir: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config JSON: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allocator.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "allocator.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.allocator.initial_backoff_ms > self.allocator.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "allocator.initial_backoff_ms must not exceed allocator.max_backoff_ms"
                    .to_string(),
            ));
        }

        let names = [
            ("committees", &self.buckets.committees),
            ("committee_settings", &self.buckets.committee_settings),
            ("committee_members", &self.buckets.committee_members),
            ("projects", &self.buckets.projects),
        ];
        for (field, name) in names {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "buckets.{field} must not be blank"
                )));
            }
        }
        for (index, (field, name)) in names.iter().enumerate() {
            if let Some((other, _)) = names[index + 1..].iter().find(|(_, n)| n == name) {
                return Err(ConfigError::Invalid(format!(
                    "buckets.{field} and buckets.{other} must differ"
                )));
            }
        }

        if let StoreConfig::Sqlite { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "store.path must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Starts file logging when `logging.dir` is configured.
    ///
    /// Returns `Ok(false)` when logging is left off.
    pub fn init_logging(&self) -> Result<bool, LoggingError> {
        let Some(dir) = self.logging.dir.as_deref() else {
            return Ok(false);
        };
        let level = self
            .logging
            .level
            .as_deref()
            .unwrap_or(default_log_level());
        init_logging(level, dir)?;
        Ok(true)
    }
}

/// Opens the configured backend.
pub fn open_store(config: &StoreConfig) -> KvResult<Arc<dyn KvStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryKvStore::new())),
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteKvStore::open(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::{AllocatorPolicy, ConfigError, CoreConfig, StoreConfig};
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn empty_object_uses_defaults() {
        let config = CoreConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.buckets.committee_settings, "committee-settings");
    }

    #[test]
    fn sqlite_backend_is_selected_explicitly() {
        let config = CoreConfig::from_json_str(
            r#"{"store": {"backend": "sqlite", "path": "/var/lib/committees.db"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/var/lib/committees.db")
            }
        );
    }

    #[test]
    fn duplicate_bucket_names_are_rejected() {
        let err = CoreConfig::from_json_str(
            r#"{"buckets": {"committees": "shared", "committee_settings": "shared"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("must differ")));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = CoreConfig::from_json_str(r#"{"allocator": {"max_attempts": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn logging_stays_off_without_a_directory() {
        let config = CoreConfig::from_json_str(r#"{"logging": {"level": "debug"}}"#).unwrap();
        assert!(!config.init_logging().unwrap());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = CoreConfig::from_json_str(r#"{"stroe": {}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = AllocatorPolicy {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 35,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(35));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(35));
    }
}
