//! Archive configuration.
//!
//! Settings come from an optional JSON file and are then overridden by
//! environment variables:
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `TGARCHIVE_DB` | SQLite file path (`:memory:` selects the in-memory backend) |
//! | `TGARCHIVE_INVALIDATION_SECS` | global invalidation interval |
//! | `TGARCHIVE_STORE_TIMEOUT_MS` | bound on every store call |
//! | `TGARCHIVE_BATCH_CONCURRENCY` | keys recorded at once |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tgarchive_core::{EntityKind, InvalidationPolicy, SnapshotError};

use crate::recorder::SnapshotRecorder;
use crate::snapshot_store::{InMemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};

pub const ENV_DB: &str = "TGARCHIVE_DB";
pub const ENV_INVALIDATION_SECS: &str = "TGARCHIVE_INVALIDATION_SECS";
pub const ENV_STORE_TIMEOUT_MS: &str = "TGARCHIVE_STORE_TIMEOUT_MS";
pub const ENV_BATCH_CONCURRENCY: &str = "TGARCHIVE_BATCH_CONCURRENCY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to open archive: {0}")]
    Store(#[from] SnapshotError),
}

/// Where snapshots are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Sqlite { path: PathBuf },
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub storage: StorageConfig,
    /// Maximum seconds between snapshots of an unchanged entity.
    pub invalidation_secs: i64,
    /// Per-kind replacements for `invalidation_secs`.
    pub invalidation_overrides: BTreeMap<EntityKind, i64>,
    pub store_timeout_ms: u64,
    pub batch_concurrency: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Sqlite {
                path: PathBuf::from("tgarchive.db"),
            },
            invalidation_secs: 432_000,
            invalidation_overrides: BTreeMap::new(),
            store_timeout_ms: 5_000,
            batch_concurrency: 8,
        }
    }
}

impl ArchiveConfig {
    /// Load from `path` (or defaults), apply process environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(db) = lookup(ENV_DB) {
            self.storage = if db == ":memory:" {
                StorageConfig::Memory
            } else {
                StorageConfig::Sqlite {
                    path: PathBuf::from(db),
                }
            };
        }
        if let Some(value) = lookup(ENV_INVALIDATION_SECS) {
            self.invalidation_secs = parse_env(ENV_INVALIDATION_SECS, value)?;
        }
        if let Some(value) = lookup(ENV_STORE_TIMEOUT_MS) {
            self.store_timeout_ms = parse_env(ENV_STORE_TIMEOUT_MS, value)?;
        }
        if let Some(value) = lookup(ENV_BATCH_CONCURRENCY) {
            self.batch_concurrency = parse_env(ENV_BATCH_CONCURRENCY, value)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        interval("invalidation_secs", self.invalidation_secs)?;
        for (kind, secs) in &self.invalidation_overrides {
            interval(&format!("invalidation override for {kind}"), *secs)?;
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store_timeout_ms must be positive".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::Invalid("batch_concurrency must be positive".into()));
        }
        Ok(())
    }

    pub fn invalidation_policy(&self) -> Result<InvalidationPolicy, ConfigError> {
        let default = interval("invalidation_secs", self.invalidation_secs)?;
        let mut policy = InvalidationPolicy::new(default);
        for (kind, secs) in &self.invalidation_overrides {
            let secs = interval(&format!("invalidation override for {kind}"), *secs)?;
            policy = policy.with_override(*kind, secs);
        }
        Ok(policy)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Open the configured backend.
    pub async fn open_store(&self) -> Result<Arc<dyn SnapshotStore>, SnapshotError> {
        Ok(match &self.storage {
            StorageConfig::Sqlite { path } => {
                Arc::new(SqliteSnapshotStore::open(path, self.store_timeout()).await?)
            }
            StorageConfig::Memory => Arc::new(InMemorySnapshotStore::new()),
        })
    }

    /// Open the configured backend and wrap it in a recorder.
    pub async fn recorder(&self) -> Result<SnapshotRecorder<Arc<dyn SnapshotStore>>, ConfigError> {
        let policy = self.invalidation_policy()?;
        let store = self.open_store().await?;
        Ok(SnapshotRecorder::new(store, policy)
            .with_store_timeout(self.store_timeout())
            .with_concurrency(self.batch_concurrency))
    }
}

/// A non-negative interval that fits a `chrono::Duration`.
fn interval(name: &str, secs: i64) -> Result<chrono::Duration, ConfigError> {
    if secs < 0 {
        return Err(ConfigError::Invalid(format!("{name} must not be negative (got {secs})")));
    }
    chrono::Duration::try_seconds(secs)
        .ok_or_else(|| ConfigError::Invalid(format!("{name} is too large (got {secs})")))
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}
