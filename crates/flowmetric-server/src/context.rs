//! Explicit server state, owned and passed to handlers.

use flowmetric_cache::MetricsCache;
use flowmetric_config::{AppConfig, EvictionPolicyKind};
use flowmetric_error::Result;
use flowmetric_events::EventBus;
use flowmetric_perftrack::PerfStore;
use flowmetric_types::PerformanceWeights;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::middleware::rate_limit::RateLimiter;

/// Shared handle handed to every handler.
pub type SharedContext = Arc<ServerContext>;

/// Status of an out-of-band refresh job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum JobStatus {
    Running,
    Finished { partial: bool },
    Failed { error: String },
}

/// All shared mutable state of the dashboard process.
pub struct ServerContext {
    /// Immutable startup configuration.
    pub config: AppConfig,
    /// Performance weights, updatable at runtime via the settings API.
    pub weights: RwLock<PerformanceWeights>,
    /// Two-tier metrics cache.
    pub cache: Arc<MetricsCache>,
    /// In-process event bus.
    pub bus: Arc<EventBus>,
    /// Route-timing store.
    pub perf: Arc<PerfStore>,
    /// Rate limiter used by the outermost middleware.
    pub limiter: RateLimiter,
    /// Refresh jobs by id.
    pub jobs: Mutex<HashMap<Uuid, JobStatus>>,
}

impl ServerContext {
    /// Assemble the context from validated configuration, wiring the
    /// cache onto the bus.
    ///
    /// # Errors
    ///
    /// `Internal` when the performance store cannot be opened.
    pub fn new(config: AppConfig) -> Result<SharedContext> {
        let policy: Box<dyn flowmetric_cache::EvictionPolicy> = match config.cache.eviction_policy {
            EvictionPolicyKind::Lru => Box::new(flowmetric_cache::LruPolicy),
            EvictionPolicyKind::Ttl => Box::new(flowmetric_cache::TtlPolicy::new(
                Duration::from_secs(config.cache.ttl_seconds),
            )),
        };
        let cache = Arc::new(MetricsCache::new(
            config.cache.artifact_dir.clone(),
            policy,
            config.cache.memory_max_bytes,
            config.cache.max_artifacts,
        ));
        let bus = Arc::new(EventBus::new(config.events.retention));
        cache.attach(&bus);

        let perf = Arc::new(PerfStore::open(&config.performance_tracker.db_path)?);
        let limiter = RateLimiter::new(
            config.dashboard.rate_limiting.enabled,
            config.dashboard.rate_limiting.default_limit,
        );

        Ok(Arc::new(Self {
            weights: RwLock::new(config.performance_weights),
            config,
            cache,
            bus,
            perf,
            limiter,
            jobs: Mutex::new(HashMap::new()),
        }))
    }

    /// A config copy whose weights reflect runtime updates; handed to
    /// collection jobs.
    #[must_use]
    pub fn effective_config(&self) -> AppConfig {
        let mut config = self.config.clone();
        config.performance_weights = *self.weights.read();
        config
    }
}
