pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod error;
pub mod healthcheck;
pub mod metrics;
pub mod observability;
pub mod service;
pub mod store;

pub use observability::{init_tracing, LogFormat};

use crate::cache::ResilientCache;
use crate::config::AppConfig;
use crate::error::Result;
use crate::healthcheck::HealthMonitor;
use crate::service::{UserCache, UserService};
use crate::store::{InMemoryUserRepository, ResilientUserRepository};
use std::sync::Arc;
use tracing::info;

/// Fully wired data-access layer
pub struct App {
    pub service: UserService,
    pub monitor: Arc<HealthMonitor>,
}

/// Build the adapters, the health monitor and the decorated service
pub async fn init_app(config: &AppConfig) -> Result<App> {
    config.validate()?;

    let store = Arc::new(InMemoryUserRepository::new());
    let raw_cache = Arc::new(cache::connect(&config.cache).await?);

    let monitor = Arc::new(HealthMonitor::from_config(
        config,
        store.clone(),
        raw_cache.clone(),
    ));

    let repo = ResilientUserRepository::from_config(store, monitor.clone(), config);
    let cache = ResilientCache::from_config(raw_cache, monitor.clone(), config);
    let service = UserService::new(
        Arc::new(repo),
        UserCache::from_config(Arc::new(cache), &config.cache),
        monitor.clone(),
    );

    info!(
        failure_threshold = config.circuit_breaker.failure_threshold,
        reset_timeout_ms = config.circuit_breaker.reset_timeout_ms,
        cache_backend = ?config.cache.backend,
        "Data access layer ready"
    );

    Ok(App { service, monitor })
}
