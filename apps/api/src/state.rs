use std::sync::Arc;

use crate::config::Config;
use crate::layout::{
    CachedLayout, CalculationEngine, LayoutProbe, MeasurementService, PhantomOptions,
    PhantomRenderer, ReadinessBoard, ServiceConfig,
};
use crate::measurement::{
    CacheConfig, MeasurementCache, SharedDatabase, SharedMeasurementCache, SystemClock,
};
use crate::snapshots::SnapshotStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// One cache for phantom passes and post-render element measurements.
    pub cache: SharedMeasurementCache<CachedLayout>,
    pub database: SharedDatabase,
    pub engine: CalculationEngine,
    pub service: MeasurementService,
    /// Present only when `REDIS_URL` is configured.
    pub snapshots: Option<SnapshotStore>,
}

impl AppState {
    /// Wires the layout pipeline around `probe`, which must read from `database`.
    /// The cache cleanup task is not started here.
    pub fn build(
        config: &Config,
        database: SharedDatabase,
        probe: Arc<dyn LayoutProbe>,
        snapshots: Option<SnapshotStore>,
    ) -> Self {
        let cache = SharedMeasurementCache::new(MeasurementCache::new(
            CacheConfig {
                ttl: config.cache_ttl,
                max_size: config.cache_max_size,
                cleanup_interval: config.cache_cleanup_interval,
                enable_stats: true,
            },
            Arc::new(SystemClock),
        ));

        let renderer = PhantomRenderer::new(
            probe,
            cache.clone(),
            database.clone(),
            PhantomOptions {
                include_cover: config.include_cover_page,
                overflow: config.overflow_policy,
            },
        );
        let engine = CalculationEngine::new(renderer, database.clone(), config.diagnostics);
        let service = MeasurementService::new(
            engine.clone(),
            cache.clone(),
            database.clone(),
            ReadinessBoard::new(config.ready_delay),
            ServiceConfig {
                landscape_threshold: config.landscape_threshold,
                recalc_delay: config.landscape_recalc_delay,
            },
        );

        Self {
            cache,
            database,
            engine,
            service,
            snapshots,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use crate::layout::EstimatingProbe;
    use crate::measurement::MeasurementDatabase;

    let database = MeasurementDatabase::new().shared();
    let probe = Arc::new(EstimatingProbe::new(database.clone()));
    AppState::build(&Config::default(), database, probe, None)
}
