//! Metric name and label definitions.
//!
//! Centralizing the names keeps the scheduler and any exporter in agreement.

/// Job firing metrics
pub mod scheduler {
    /// Total fires handed to a worker, scheduled or out-of-band
    pub const FIRES_TOTAL: &str = "vigil_scheduler_fires_total";
    /// Fires whose resolution or body failed
    pub const FIRE_FAILURES_TOTAL: &str = "vigil_scheduler_fire_failures_total";
    /// Wall time of a fire in seconds, resolution included
    pub const FIRE_DURATION_SECONDS: &str = "vigil_scheduler_fire_duration_seconds";
    /// Scheduled occurrences skipped because the previous fire was still running
    pub const MISFIRES_TOTAL: &str = "vigil_scheduler_misfires_total";
    /// Results forwarded to the notification sink
    pub const RESULTS_DELIVERED_TOTAL: &str = "vigil_scheduler_results_delivered_total";
}

/// Trigger engine metrics
pub mod engine {
    /// Bindings currently held by an engine
    pub const BINDINGS: &str = "vigil_engine_bindings";
    /// Fires currently executing
    pub const FIRES_IN_FLIGHT: &str = "vigil_engine_fires_in_flight";
}

/// Common label keys
pub mod labels {
    pub const ENGINE: &str = "engine";
}
