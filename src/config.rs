//! Thread pool configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set through the builder methods
//! 2. **Environment variables**: values from `FULFIL_POOL_*` variables
//! 3. **Config file**: a `[pool]` table in a TOML file (requires the
//!    `config-file` feature)
//! 4. **Defaults**: [`PoolConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FULFIL_POOL_MIN_THREADS` | `usize` | `min_threads` |
//! | `FULFIL_POOL_MAX_THREADS` | `usize` | `max_threads` |
//! | `FULFIL_POOL_IDLE_TIMEOUT_MS` | `u64` | `idle_timeout` |
//! | `FULFIL_POOL_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use crate::error::ConfigError;
use std::time::Duration;

/// Environment variable name for the minimum pool size.
pub const ENV_POOL_MIN_THREADS: &str = "FULFIL_POOL_MIN_THREADS";
/// Environment variable name for the maximum pool size.
pub const ENV_POOL_MAX_THREADS: &str = "FULFIL_POOL_MAX_THREADS";
/// Environment variable name for the idle retirement timeout, in milliseconds.
pub const ENV_POOL_IDLE_TIMEOUT_MS: &str = "FULFIL_POOL_IDLE_TIMEOUT_MS";
/// Environment variable name for the worker thread name prefix.
pub const ENV_POOL_THREAD_NAME_PREFIX: &str = "FULFIL_POOL_THREAD_NAME_PREFIX";

/// Default idle timeout before retiring threads above `min_threads`.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sizing and naming of a [`ThreadPool`](crate::pool::ThreadPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Threads spawned eagerly and never retired.
    pub min_threads: usize,
    /// Upper bound on worker threads.
    pub max_threads: usize,
    /// Idle time after which threads above `min_threads` exit.
    pub idle_timeout: Duration,
    /// Worker threads are named `{prefix}-{n}`.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(4, usize::from);
        Self {
            min_threads: 0,
            max_threads: parallelism,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "fulfil-pool".to_string(),
        }
    }
}

impl PoolConfig {
    /// Starts a builder from the defaults.
    #[must_use]
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Defaults overridden by the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for an unparseable variable and
    /// [`ConfigError::Invalid`] if the result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the sizing invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `max_threads` is zero or below
    /// `min_threads`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::Invalid(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if self.max_threads < self.min_threads {
            return Err(ConfigError::Invalid(format!(
                "max_threads ({}) is below min_threads ({})",
                self.max_threads, self.min_threads
            )));
        }
        Ok(())
    }
}

/// Builder resolving programmatic settings over env and file settings.
#[derive(Debug, Default, Clone)]
pub struct PoolConfigBuilder {
    min_threads: Option<usize>,
    max_threads: Option<usize>,
    idle_timeout: Option<Duration>,
    thread_name_prefix: Option<String>,
    use_env: bool,
    #[cfg(feature = "config-file")]
    file: Option<PoolTomlConfig>,
}

impl PoolConfigBuilder {
    /// Sets the minimum pool size.
    #[must_use]
    pub const fn min_threads(mut self, n: usize) -> Self {
        self.min_threads = Some(n);
        self
    }

    /// Sets the maximum pool size.
    #[must_use]
    pub const fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = Some(n);
        self
    }

    /// Sets the idle retirement timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Applies `FULFIL_POOL_*` environment variables below programmatic
    /// settings.
    #[must_use]
    pub const fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Applies a parsed `[pool]` table below env and programmatic settings.
    #[cfg(feature = "config-file")]
    #[must_use]
    pub fn with_toml(mut self, file: PoolTomlConfig) -> Self {
        self.file = Some(file);
        self
    }

    /// Reads a TOML file and applies its `[pool]` table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    #[cfg(feature = "config-file")]
    pub fn with_toml_file(self, path: &std::path::Path) -> Result<Self, ConfigError> {
        Ok(self.with_toml(parse_toml_file(path)?))
    }

    /// Resolves the layers into a validated config.
    ///
    /// # Errors
    ///
    /// Fails on unparseable env values or invalid sizing.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        let mut config = PoolConfig::default();
        #[cfg(feature = "config-file")]
        if let Some(file) = &self.file {
            apply_toml_config(&mut config, file);
        }
        if self.use_env {
            apply_env_overrides(&mut config)?;
        }
        if let Some(n) = self.min_threads {
            config.min_threads = n;
        }
        if let Some(n) = self.max_threads {
            config.max_threads = n;
        }
        if let Some(timeout) = self.idle_timeout {
            config.idle_timeout = timeout;
        }
        if let Some(prefix) = self.thread_name_prefix {
            config.thread_name_prefix = prefix;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Applies environment overrides to `config`.
///
/// Only variables that are set are applied.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnv`] if a variable is set to an
/// unparseable value.
pub fn apply_env_overrides(config: &mut PoolConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_POOL_MIN_THREADS) {
        config.min_threads = parse_usize(ENV_POOL_MIN_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_POOL_MAX_THREADS) {
        config.max_threads = parse_usize(ENV_POOL_MAX_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_POOL_IDLE_TIMEOUT_MS) {
        config.idle_timeout = Duration::from_millis(parse_u64(ENV_POOL_IDLE_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_POOL_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            expected: "unsigned integer",
            value: val.to_string(),
        })
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            expected: "milliseconds as unsigned integer",
            value: val.to_string(),
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable pool configuration.
///
/// ```toml
/// [pool]
/// min_threads = 1
/// max_threads = 8
/// idle_timeout_ms = 5000
/// thread_name_prefix = "myapp-pool"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug, Clone)]
pub struct PoolTomlConfig {
    /// Pool settings.
    #[serde(default)]
    pub pool: PoolToml,
}

/// `[pool]` section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug, Clone)]
pub struct PoolToml {
    /// Minimum number of threads.
    pub min_threads: Option<usize>,
    /// Maximum number of threads.
    pub max_threads: Option<usize>,
    /// Idle retirement timeout in milliseconds.
    pub idle_timeout_ms: Option<u64>,
    /// Worker thread name prefix.
    pub thread_name_prefix: Option<String>,
}

/// Applies the fields present in `toml` to `config`.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut PoolConfig, toml: &PoolTomlConfig) {
    if let Some(v) = toml.pool.min_threads {
        config.min_threads = v;
    }
    if let Some(v) = toml.pool.max_threads {
        config.max_threads = v;
    }
    if let Some(ms) = toml.pool.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(ms);
    }
    if let Some(ref v) = toml.pool.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
}

/// Parses a TOML string.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed input.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<PoolTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Reads and parses a TOML file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<PoolTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_toml_str(&content)
}
