// Layout pre-calculation: phantom measurement, page distribution and post-render
// supervision. Distribution is CPU-bound and runs inside tokio::task::spawn_blocking.

pub mod distribution;
pub mod engine;
mod error;
pub mod handlers;
pub mod http_probe;
pub mod measurement;
pub mod page;
pub mod phantom;
pub mod preflight;
pub mod probe;
pub mod readiness;
pub mod service;

pub use distribution::OverflowPolicy;
pub use engine::CalculationEngine;
pub use error::LayoutError;
pub use measurement::CachedLayout;
pub use phantom::{PhantomOptions, PhantomRenderer};
pub use probe::{EstimatingProbe, LayoutProbe};
pub use readiness::ReadinessBoard;
pub use service::{MeasurementService, ServiceConfig};
