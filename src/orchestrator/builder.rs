//! Builder for configuring orchestrator instances

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::Orchestrator;
use crate::cache::{CacheConfig, IntegrityKey, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, SECRET_ENV_VAR, Secrets};
use crate::dispatch::{DispatchConfig, Dispatcher, InferenceBackend, RetryConfig};
use crate::store::{CacheStore, MemoryStore, SqliteStore};
use crate::{HuginnError, Result};

/// Main entry point for creating orchestrator instances.
pub struct Huginn;

impl Huginn {
    /// Create a new builder for configuring the orchestrator.
    pub fn builder() -> HuginnBuilder {
        HuginnBuilder::new()
    }
}

enum StoreSource {
    Memory,
    Sqlite(PathBuf),
    Custom(Arc<dyn CacheStore>),
}

/// Builder for configuring orchestrator instances.
pub struct HuginnBuilder {
    backend: Option<Arc<dyn InferenceBackend>>,
    dispatch: DispatchConfig,
    cache: CacheConfig,
    cache_enabled: bool,
    store: StoreSource,
    secret: Option<Vec<u8>>,
    integrity_key: Option<IntegrityKey>,
    clock: Arc<dyn Clock>,
}

impl HuginnBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            dispatch: DispatchConfig::default(),
            cache: CacheConfig::default(),
            cache_enabled: true,
            store: StoreSource::Memory,
            secret: None,
            integrity_key: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Start from a loaded configuration and secrets.
    ///
    /// Uses the SQLite store at [`Config::cache_path`]. The backend still
    /// has to be supplied.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let mut builder = Self::new()
            .dispatch(config.dispatch_config()?)
            .cache_config(config.cache_config())
            .enable_cache(config.cache.enabled);
        if config.cache.enabled {
            builder = builder.sqlite(config.cache_path()?);
        }
        if let Some(secret) = secrets.integrity_secret() {
            builder = builder.integrity_secret(secret);
        }
        Ok(builder)
    }

    /// The external inference service.
    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn dispatch(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.dispatch.max_concurrent = n;
        self
    }

    /// Default per-task timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.dispatch.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.dispatch.retry = retry;
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Turn the response cache on or off (default: on).
    pub fn enable_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Persist cache records in SQLite at `path`.
    pub fn sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = StoreSource::Sqlite(path.into());
        self
    }

    /// Use a caller-supplied store.
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = StoreSource::Custom(store);
        self
    }

    /// Process secret for integrity tags (at least 32 bytes).
    pub fn integrity_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.secret = Some(secret.as_ref().to_vec());
        self
    }

    /// Use an already constructed key; takes precedence over
    /// [`integrity_secret`](Self::integrity_secret).
    pub fn integrity_key(mut self, key: IntegrityKey) -> Self {
        self.integrity_key = Some(key);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the orchestrator.
    ///
    /// Fails on a missing backend, invalid limits, or (with the cache
    /// enabled) a missing or short integrity secret. A store that cannot
    /// be opened is not fatal: the orchestrator runs without a cache.
    pub async fn build(self) -> Result<Orchestrator> {
        let backend = self.backend.ok_or_else(|| {
            HuginnError::Configuration("no inference backend configured".into())
        })?;
        let dispatcher = Dispatcher::new(backend, self.dispatch)?;
        let default_ttl = self.cache.ttl;

        let cache = if self.cache_enabled {
            let key = match (self.integrity_key, self.secret) {
                (Some(key), _) => key,
                (None, Some(secret)) => IntegrityKey::new(secret)?,
                (None, None) => {
                    return Err(HuginnError::Configuration(format!(
                        "cache enabled but no integrity secret configured \
                         (set {SECRET_ENV_VAR} or secrets.toml); refusing to start"
                    )));
                }
            };
            if self.cache.max_size_bytes == 0 {
                return Err(HuginnError::Configuration(
                    "cache max_size_bytes must be greater than zero".into(),
                ));
            }
            open_cache(self.store, key, self.cache, self.clock).await
        } else {
            info!("response cache disabled");
            None
        };

        info!(
            backend = dispatcher.backend_name(),
            max_concurrent = dispatcher.config().max_concurrent,
            cache = cache.is_some(),
            "orchestrator ready"
        );
        Ok(Orchestrator::new(cache, dispatcher, default_ttl))
    }
}

impl Default for HuginnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn open_cache(
    source: StoreSource,
    key: IntegrityKey,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
) -> Option<Arc<ResponseCache>> {
    let store: Arc<dyn CacheStore> = match source {
        StoreSource::Memory => Arc::new(MemoryStore::new()),
        StoreSource::Custom(store) => store,
        StoreSource::Sqlite(path) => match SqliteStore::open(&path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache store unavailable; running without cache");
                return None;
            }
        },
    };
    match ResponseCache::open_with_clock(store, key, config, clock).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "cache store unavailable; running without cache");
            None
        }
    }
}
