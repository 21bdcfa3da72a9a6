// Measurement storage: the TTL cache and the standard-measurement catalogue.
// Both are process-wide and injected through `AppState`.

pub mod cache;
pub mod database;
pub mod shared;

pub use cache::{CacheConfig, MeasurementCache, SystemClock};
pub use database::{MeasurementDatabase, SharedDatabase};
pub use shared::SharedMeasurementCache;
