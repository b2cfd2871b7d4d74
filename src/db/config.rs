//! Database configuration, loaded from the environment.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::transaction::IsolationLevel;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(String),

    #[error("environment variable \"{key}\" must be an integer. Is \"{value}\"")]
    InvalidInt { key: String, value: String },

    #[error("environment variable \"{key}\" is out of range: {reason}")]
    OutOfRange { key: String, reason: String },

    #[error("invalid database url \"{0}\": expected memory:// or file://<path>")]
    InvalidUrl(String),

    #[error("invalid isolation level in \"{key}\": {value}")]
    InvalidIsolation { key: String, value: String },
}

/// Where the data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// Ephemeral, lost on shutdown.
    Memory,
    /// Loaded from and flushed to a JSON snapshot file.
    File(PathBuf),
}

impl DatabaseUrl {
    /// Snapshot path for file-backed databases.
    pub fn snapshot_path(&self) -> Option<&PathBuf> {
        match self {
            DatabaseUrl::Memory => None,
            DatabaseUrl::File(path) => Some(path),
        }
    }
}

impl FromStr for DatabaseUrl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "memory://" || s == "memory:" {
            return Ok(DatabaseUrl::Memory);
        }
        match s.strip_prefix("file://") {
            Some(path) if !path.is_empty() => Ok(DatabaseUrl::File(PathBuf::from(path))),
            _ => Err(ConfigError::InvalidUrl(s.to_string())),
        }
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseUrl::Memory => write!(f, "memory://"),
            DatabaseUrl::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Read access to environment variables with typed getters.
///
/// Values are trimmed on the way in; stray newlines in deployment configs
/// are common enough.
#[derive(Debug, Clone, Default)]
pub struct EnvAccessor {
    vars: HashMap<String, String>,
}

impl EnvAccessor {
    /// Snapshot of the process environment.
    pub fn from_env() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Like [`from_vars`](Self::from_vars); entries that are not valid
    /// UTF-8 are skipped.
    pub fn from_os_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        Self::from_vars(
            vars.into_iter()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.as_ref().trim().to_string()))
                .collect(),
        }
    }

    /// Replace or add a single variable, e.g. from a command line flag.
    pub fn with_override(mut self, key: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.vars.insert(key.into(), value.as_ref().trim().to_string());
        self
    }

    pub fn get_optional(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn get_required(&self, key: &str) -> ConfigResult<&str> {
        self.get_optional(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn get_optional_int(&self, key: &str) -> ConfigResult<Option<i64>> {
        self.get_optional(key)
            .map(|value| parse_int(key, value))
            .transpose()
    }

    /// `1` and `true` are true, anything else is false.
    pub fn get_optional_bool(&self, key: &str) -> Option<bool> {
        self.get_optional(key)
            .map(|value| value == "1" || value == "true")
    }
}

fn parse_int(key: &str, value: &str) -> ConfigResult<i64> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidInt {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Where the data lives.
    pub url: DatabaseUrl,
    /// Maximum number of connections checked out at once.
    pub max_connections: usize,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
    /// Isolation for transactions that don't ask for one.
    pub isolation: IsolationLevel,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DatabaseUrl::Memory,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_millis(Self::DEFAULT_ACQUIRE_TIMEOUT_MS),
            isolation: IsolationLevel::default(),
        }
    }
}

impl DatabaseConfig {
    pub const DEFAULT_MAX_CONNECTIONS: usize = 120;
    pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5000;
    /// Largest pool the connection semaphore can hold.
    pub const MAX_CONNECTIONS_LIMIT: usize = Semaphore::MAX_PERMITS;

    /// Create a new configuration for the given url.
    pub fn new(url: DatabaseUrl) -> Self {
        Self {
            url,
            ..Default::default()
        }
    }

    /// Ephemeral database, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(DatabaseUrl::Memory)
    }

    /// Load from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_accessor(&EnvAccessor::from_env())
    }

    /// Load from an accessor.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_POOL_MAX` (default 120)
    /// - `DATABASE_POOL_TIMEOUT_MS` (default 5000)
    /// - `DATABASE_ISOLATION` (default `READ COMMITTED`)
    pub fn from_accessor(env: &EnvAccessor) -> ConfigResult<Self> {
        let url = env.get_required("DATABASE_URL")?.parse::<DatabaseUrl>()?;

        let max_connections = match env.get_optional_int("DATABASE_POOL_MAX")? {
            None => Self::DEFAULT_MAX_CONNECTIONS,
            Some(n) if n < 1 => {
                return Err(ConfigError::OutOfRange {
                    key: "DATABASE_POOL_MAX".to_string(),
                    reason: format!("must be at least 1, got {n}"),
                })
            }
            Some(n) => match usize::try_from(n) {
                Ok(n) if n <= Self::MAX_CONNECTIONS_LIMIT => n,
                _ => {
                    return Err(ConfigError::OutOfRange {
                        key: "DATABASE_POOL_MAX".to_string(),
                        reason: format!("must be at most {}, got {n}", Self::MAX_CONNECTIONS_LIMIT),
                    })
                }
            },
        };

        let acquire_timeout = match env.get_optional_int("DATABASE_POOL_TIMEOUT_MS")? {
            None => Duration::from_millis(Self::DEFAULT_ACQUIRE_TIMEOUT_MS),
            Some(ms) if ms >= 0 => Duration::from_millis(ms as u64),
            Some(ms) => {
                return Err(ConfigError::OutOfRange {
                    key: "DATABASE_POOL_TIMEOUT_MS".to_string(),
                    reason: format!("must not be negative, got {ms}"),
                })
            }
        };

        let isolation = match env.get_optional("DATABASE_ISOLATION") {
            None => IsolationLevel::default(),
            Some(value) => value.parse::<IsolationLevel>().map_err(|_| ConfigError::InvalidIsolation {
                key: "DATABASE_ISOLATION".to_string(),
                value: value.to_string(),
            })?,
        };

        Ok(Self {
            url,
            max_connections,
            acquire_timeout,
            isolation,
        })
    }

    /// Set max_connections, clamped to `1..=MAX_CONNECTIONS_LIMIT`.
    pub fn max_connections(mut self, value: usize) -> Self {
        self.max_connections = value.clamp(1, Self::MAX_CONNECTIONS_LIMIT);
        self
    }

    /// Set acquire_timeout.
    pub fn acquire_timeout(mut self, value: Duration) -> Self {
        self.acquire_timeout = value;
        self
    }

    /// Set the default isolation level.
    pub fn isolation(mut self, value: IsolationLevel) -> Self {
        self.isolation = value;
        self
    }
}
