use thiserror::Error;

use crate::layout::probe::ProbeError;

/// Failure of a pre-calculation or reconciliation pass.
///
/// Any of these aborts the pass as a whole; callers fall back to no pagination
/// hints rather than partial ones.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("probe returned no geometry for box '{0}'")]
    MissingBox(String),

    #[error("element {index} is {height}px tall but the page holds {usable}px")]
    OversizedElement { index: usize, height: f64, usable: f64 },

    #[error("unexpected cache entry under '{0}'")]
    CacheShape(String),

    #[error("distribution task failed: {0}")]
    Task(String),
}
