//! Metrics interface for the vigil crates.
//!
//! Metric names live in [`scheduler`] and [`engine`]; values are recorded
//! through the `metrics` facade and stay no-ops until the host installs a
//! recorder.
//!
//! ```rust,ignore
//! use vigil_metrics::{counter, scheduler};
//!
//! counter!(scheduler::FIRES_TOTAL, "engine" => "local").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
