//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! With no file at all, built-in defaults apply.
//!
//! The integrity secret is loaded separately with mandatory permission checks:
//! 1. `~/.huginn/secrets.toml` (user, must be 0600)
//! 2. `/etc/huginn/secrets.toml` (system, must be 0600)
//! 3. `HUGINN_CACHE_SECRET` environment variable

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::dispatch::{DispatchConfig, RetryConfig};
use crate::{HuginnError, Result};

/// Environment variable holding the cache integrity secret.
pub const SECRET_ENV_VAR: &str = "HUGINN_CACHE_SECRET";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub cache: CacheSection,
}

/// `[dispatch]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    /// Maximum concurrent external calls (default: 8).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-task timeout in seconds, fractions allowed (default: 120).
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_seconds: default_timeout_seconds(),
            retry: RetrySection::default(),
        }
    }
}

fn default_max_concurrent() -> usize {
    8
}

fn default_timeout_seconds() -> f64 {
    120.0
}

/// `[dispatch.retry]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    /// Total attempts including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// `[cache]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Default TTL in seconds (default: 86400).
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Byte capacity (default: 256 MiB).
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    #[serde(default = "default_enabled")]
    pub memory_index: bool,
    /// SQLite database path (default: `<cache dir>/huginn/responses.db`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_seconds: default_ttl_seconds(),
            max_size_bytes: default_max_size_bytes(),
            memory_index: default_enabled(),
            path: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    86_400
}

fn default_max_size_bytes() -> u64 {
    256 * 1024 * 1024
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first of
    /// `~/.huginn/config.toml` and `/etc/huginn/config.toml` that exists is
    /// used, falling back to defaults. The result is validated.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_config_path(explicit_path)? else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            HuginnError::Configuration(msg) => {
                HuginnError::Configuration(format!("{path:?}: {msg}"))
            }
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| HuginnError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/huginn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Reject values the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.dispatch_config()?.validate()?;
        if self.cache.enabled && self.cache.max_size_bytes == 0 {
            return Err(HuginnError::Configuration(
                "cache.max_size_bytes must be greater than zero".into(),
            ));
        }
        if self.dispatch.retry.initial_delay_ms > self.dispatch.retry.max_delay_ms {
            return Err(HuginnError::Configuration(
                "dispatch.retry.initial_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Dispatcher settings. Fails if `timeout_seconds` is not a finite,
    /// non-negative number.
    pub fn dispatch_config(&self) -> Result<DispatchConfig> {
        let timeout = Duration::try_from_secs_f64(self.dispatch.timeout_seconds).map_err(|e| {
            HuginnError::Configuration(format!(
                "dispatch.timeout_seconds = {}: {e}",
                self.dispatch.timeout_seconds
            ))
        })?;
        let retry = &self.dispatch.retry;
        Ok(DispatchConfig::new()
            .max_concurrent(self.dispatch.max_concurrent)
            .timeout(timeout)
            .retry(
                RetryConfig::new()
                    .max_attempts(retry.max_attempts)
                    .initial_delay(Duration::from_millis(retry.initial_delay_ms))
                    .max_delay(Duration::from_millis(retry.max_delay_ms)),
            ))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_size_bytes(self.cache.max_size_bytes)
            .ttl(Duration::from_secs(self.cache.ttl_seconds))
            .memory_index(self.cache.memory_index)
    }

    /// Database location: the configured path, or the platform cache dir.
    pub fn cache_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cache.path {
            return Ok(path.clone());
        }
        dirs::cache_dir()
            .map(|dir| dir.join("huginn").join("responses.db"))
            .ok_or_else(|| {
                HuginnError::Configuration(
                    "No cache directory on this platform; set cache.path".into(),
                )
            })
    }
}

/// Secrets file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub cache: Option<CacheSecret>,
}

/// `[cache]` table of the secrets file.
#[derive(Clone, Deserialize)]
pub struct CacheSecret {
    pub integrity_secret: String,
}

impl std::fmt::Debug for CacheSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSecret")
            .field("integrity_secret", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (the secret may come from
    /// the environment).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".huginn").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/huginn/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load one secrets file, enforcing 0600/0400 permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(HuginnError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Integrity secret, falling back to `HUGINN_CACHE_SECRET`.
    pub fn integrity_secret(&self) -> Option<String> {
        self.cache
            .as_ref()
            .map(|c| c.integrity_secret.clone())
            .or_else(|| std::env::var(SECRET_ENV_VAR).ok())
            .filter(|s| !s.is_empty())
    }
}
