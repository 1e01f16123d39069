//! Gateway configuration and component factory
//!
//! `GatewayConfig` is resolved once at startup from defaults and `STRATA_*`
//! environment variables, then passed by reference into constructors.
//! `ComponentFactory` turns it into the cache backing and backend clients.

use crate::backend::HttpBackend;
use crate::cache::{CacheBacking, DataCache, DisabledCache, MemoryCache, RedisCache};
use crate::loader::AvailabilitySource;
use crate::pipeline::SplitMode;
use crate::query::PartialDataPolicy;
use crate::{Error, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Response cache settings
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub backing: CacheBacking,
    /// Memory backing capacity
    pub max_bytes: u64,
    pub ttl: Duration,
    /// Required for the redis backing
    pub redis_url: Option<String>,
    pub redis_prefix: String,
    /// Bound on every redis call
    pub redis_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backing: CacheBacking::Memory,
            max_bytes: 256 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
            redis_url: None,
            redis_prefix: "strata".to_string(),
            redis_timeout: Duration::from_millis(250),
        }
    }
}

/// Metadata loader settings
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    pub initial_delay: Duration,
    pub segment_period: Duration,
    pub datasource_period: Duration,
    pub dimension_period: Duration,
    /// Loader runs allowed at once
    pub pool_size: usize,
    /// Extra attempts per dataset fetch
    pub fetch_retries: u32,
    pub fetch_backoff: Duration,
    /// A loader without a success for this long reports unhealthy
    pub staleness_threshold: Duration,
    pub availability_source: AvailabilitySource,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            segment_period: Duration::from_secs(60),
            datasource_period: Duration::from_secs(300),
            dimension_period: Duration::from_secs(900),
            pool_size: 4,
            fetch_retries: 2,
            fetch_backoff: Duration::from_millis(200),
            staleness_threshold: Duration::from_secs(600),
            availability_source: AvailabilitySource::Coordinator,
        }
    }
}

/// Broker and coordinator endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub broker_url: String,
    pub coordinator_url: String,
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            broker_url: "http://localhost:8082/druid/v2".to_string(),
            coordinator_url: "http://localhost:8081/druid/coordinator/v1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Requests estimated above this weight are rejected
    pub weight_limit: u64,
    /// Weight multiplier applied to sketch metrics
    pub sketch_weight: u64,
    /// Cardinality assumed for dimensions with no loaded values
    pub default_cardinality: u64,
    /// Queries spanning more than this are split
    pub split_threshold: Duration,
    pub split_mode: SplitMode,
    /// Extra dispatch attempts after a transport failure
    pub dispatch_retries: u32,
    /// First retry delay; doubles per attempt
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    pub request_timeout: Duration,
    pub partial_data_policy: PartialDataPolicy,
    pub cache: CacheConfig,
    pub loaders: LoaderConfig,
    pub backend: BackendConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            weight_limit: 100_000_000,
            sketch_weight: 16,
            default_cardinality: 1_000,
            split_threshold: Duration::from_secs(31 * 24 * 3600),
            split_mode: SplitMode::Parallel { max_in_flight: 4 },
            dispatch_retries: 2,
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
            partial_data_policy: PartialDataPolicy::ServeAvailable,
            cache: CacheConfig::default(),
            loaders: LoaderConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by environment variables
    ///
    /// Environment variables:
    /// - STRATA_WEIGHT_LIMIT, STRATA_SKETCH_WEIGHT, STRATA_DEFAULT_CARDINALITY
    /// - STRATA_SPLIT_THRESHOLD_SECS
    /// - STRATA_SPLIT_MODE: "sequential" or "parallel" (default)
    /// - STRATA_SPLIT_MAX_IN_FLIGHT
    /// - STRATA_DISPATCH_RETRIES, STRATA_RETRY_BACKOFF_MS
    /// - STRATA_REQUEST_TIMEOUT_SECS
    /// - STRATA_PARTIAL_DATA_POLICY: "serve" (default) or "reject"
    /// - STRATA_CACHE_BACKEND: "memory" (default), "redis" or "disabled"
    /// - STRATA_CACHE_MAX_BYTES, STRATA_CACHE_TTL_SECS
    /// - STRATA_REDIS_URL (required for redis), STRATA_REDIS_PREFIX, STRATA_REDIS_TIMEOUT_MS
    /// - STRATA_LOADER_INITIAL_DELAY_SECS, STRATA_LOADER_POOL_SIZE
    /// - STRATA_SEGMENT_LOADER_PERIOD_SECS, STRATA_DATASOURCE_LOADER_PERIOD_SECS,
    ///   STRATA_DIMENSION_LOADER_PERIOD_SECS
    /// - STRATA_LOADER_STALENESS_SECS
    /// - STRATA_AVAILABILITY_SOURCE: "coordinator" (default) or "segments"
    /// - STRATA_BROKER_URL, STRATA_COORDINATOR_URL, STRATA_BACKEND_TIMEOUT_SECS
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        env.set("STRATA_WEIGHT_LIMIT", &mut config.weight_limit)?;
        env.set("STRATA_SKETCH_WEIGHT", &mut config.sketch_weight)?;
        env.set("STRATA_DEFAULT_CARDINALITY", &mut config.default_cardinality)?;
        env.set_secs("STRATA_SPLIT_THRESHOLD_SECS", &mut config.split_threshold)?;
        env.set("STRATA_DISPATCH_RETRIES", &mut config.dispatch_retries)?;
        env.set_millis("STRATA_RETRY_BACKOFF_MS", &mut config.retry_backoff)?;
        env.set_secs("STRATA_REQUEST_TIMEOUT_SECS", &mut config.request_timeout)?;
        env.set("STRATA_PARTIAL_DATA_POLICY", &mut config.partial_data_policy)?;

        let max_in_flight = env
            .parse::<usize>("STRATA_SPLIT_MAX_IN_FLIGHT")?
            .unwrap_or(4);
        if let Some(mode) = env.get("STRATA_SPLIT_MODE") {
            config.split_mode = match mode.trim().to_ascii_lowercase().as_str() {
                "sequential" => SplitMode::Sequential,
                "parallel" => SplitMode::Parallel { max_in_flight },
                other => {
                    return Err(Error::Config(format!(
                        "Unknown STRATA_SPLIT_MODE: {}. Use 'sequential' or 'parallel'",
                        other
                    )))
                }
            };
        } else if let SplitMode::Parallel { .. } = config.split_mode {
            config.split_mode = SplitMode::Parallel { max_in_flight };
        }

        env.set("STRATA_CACHE_BACKEND", &mut config.cache.backing)?;
        env.set("STRATA_CACHE_MAX_BYTES", &mut config.cache.max_bytes)?;
        env.set_secs("STRATA_CACHE_TTL_SECS", &mut config.cache.ttl)?;
        config.cache.redis_url = env.get("STRATA_REDIS_URL");
        if let Some(prefix) = env.get("STRATA_REDIS_PREFIX") {
            config.cache.redis_prefix = prefix;
        }
        env.set_millis("STRATA_REDIS_TIMEOUT_MS", &mut config.cache.redis_timeout)?;

        let loaders = &mut config.loaders;
        env.set_secs("STRATA_LOADER_INITIAL_DELAY_SECS", &mut loaders.initial_delay)?;
        env.set_secs("STRATA_SEGMENT_LOADER_PERIOD_SECS", &mut loaders.segment_period)?;
        env.set_secs(
            "STRATA_DATASOURCE_LOADER_PERIOD_SECS",
            &mut loaders.datasource_period,
        )?;
        env.set_secs(
            "STRATA_DIMENSION_LOADER_PERIOD_SECS",
            &mut loaders.dimension_period,
        )?;
        env.set("STRATA_LOADER_POOL_SIZE", &mut loaders.pool_size)?;
        env.set_secs("STRATA_LOADER_STALENESS_SECS", &mut loaders.staleness_threshold)?;
        env.set("STRATA_AVAILABILITY_SOURCE", &mut loaders.availability_source)?;

        if let Some(url) = env.get("STRATA_BROKER_URL") {
            config.backend.broker_url = url;
        }
        if let Some(url) = env.get("STRATA_COORDINATOR_URL") {
            config.backend.coordinator_url = url;
        }
        env.set_secs("STRATA_BACKEND_TIMEOUT_SECS", &mut config.backend.timeout)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.weight_limit == 0 {
            return Err(Error::Config("weight limit must be positive".to_string()));
        }
        if self.split_threshold.is_zero() {
            return Err(Error::Config("split threshold must be positive".to_string()));
        }
        if let SplitMode::Parallel { max_in_flight: 0 } = self.split_mode {
            return Err(Error::Config(
                "parallel split mode needs at least one query in flight".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }
        if self.loaders.pool_size == 0 {
            return Err(Error::Config("loader pool size must be positive".to_string()));
        }
        if self.cache.backing == CacheBacking::Redis && self.cache.redis_url.is_none() {
            return Err(Error::Config(
                "STRATA_REDIS_URL required when STRATA_CACHE_BACKEND=redis".to_string(),
            ));
        }
        Ok(())
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| Error::Config(format!("invalid {}='{}': {}", name, raw, e)))
            })
            .transpose()
    }

    fn set<T>(&self, name: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.parse(name)? {
            *target = value;
        }
        Ok(())
    }

    fn set_secs(&self, name: &str, target: &mut Duration) -> Result<()> {
        if let Some(secs) = self.parse::<u64>(name)? {
            *target = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn set_millis(&self, name: &str, target: &mut Duration) -> Result<()> {
        if let Some(ms) = self.parse::<u64>(name)? {
            *target = Duration::from_millis(ms);
        }
        Ok(())
    }
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Build the response cache selected by `config.backing`.
    pub fn create_cache(config: &CacheConfig) -> Result<Arc<dyn DataCache>> {
        match config.backing {
            CacheBacking::Memory => {
                info!(
                    max_bytes = config.max_bytes,
                    ttl_secs = config.ttl.as_secs(),
                    "Using in-memory response cache"
                );
                Ok(Arc::new(MemoryCache::new(config.max_bytes, config.ttl)))
            }
            CacheBacking::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    Error::Config(
                        "STRATA_REDIS_URL required when STRATA_CACHE_BACKEND=redis".to_string(),
                    )
                })?;
                info!(prefix = %config.redis_prefix, "Using redis response cache");
                Ok(Arc::new(RedisCache::new(
                    url,
                    &config.redis_prefix,
                    config.ttl,
                    config.redis_timeout,
                )?))
            }
            CacheBacking::Disabled => {
                info!("Response cache disabled");
                Ok(Arc::new(DisabledCache::new()))
            }
        }
    }

    /// Broker/coordinator client for the configured endpoints.
    pub fn create_http_backend(config: &BackendConfig) -> Result<Arc<HttpBackend>> {
        info!(
            broker = %config.broker_url,
            coordinator = %config.coordinator_url,
            "Using HTTP backend"
        );
        Ok(Arc::new(HttpBackend::new(
            &config.broker_url,
            &config.coordinator_url,
            config.timeout,
        )?))
    }
}
