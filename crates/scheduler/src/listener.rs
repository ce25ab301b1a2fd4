//! Fire lifecycle callbacks and result delivery.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chrono::Utc,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use vigil_metrics::{counter, scheduler as scheduler_metrics};

use crate::{
    Result,
    record::ExecutionRecords,
    types::{FireOutcome, JobContext, JobExecutionResult},
};

/// Observes every fire of an engine.
///
/// `on_fire_begin` runs before the job body, `on_fire_end` exactly once
/// afterwards, whether resolution or the body failed or not.
#[async_trait]
pub trait ExecutionListener: Send + Sync {
    async fn on_fire_begin(&self, ctx: &JobContext);
    async fn on_fire_end(&self, ctx: &JobContext, outcome: &FireOutcome);
}

/// Downstream consumer of textual job results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn job_executed(&self, result: &JobExecutionResult) -> Result<()>;
}

/// Keeps the [`ExecutionRecords`] table current and forwards non-null
/// results to an optional sink.
pub struct RecordingListener {
    records: Arc<ExecutionRecords>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl RecordingListener {
    pub fn new(records: Arc<ExecutionRecords>, sink: Option<Arc<dyn ResultSink>>) -> Self {
        Self { records, sink }
    }
}

#[async_trait]
impl ExecutionListener for RecordingListener {
    async fn on_fire_begin(&self, ctx: &JobContext) {
        self.records.begin(&ctx.job.job_id, ctx.fired_at);
    }

    async fn on_fire_end(&self, ctx: &JobContext, outcome: &FireOutcome) {
        let now = Utc::now();
        let job_id = &ctx.job.job_id;
        self.records.finish(job_id, now, outcome.result.as_deref());

        let (Some(result), Some(sink)) = (&outcome.result, &self.sink) else {
            return;
        };
        let delivery = JobExecutionResult {
            job_id: job_id.clone(),
            executed_at: now,
            result: result.clone(),
        };
        match sink.job_executed(&delivery).await {
            Ok(()) => {
                debug!(job_id = %job_id, "job result delivered");
                #[cfg(feature = "metrics")]
                counter!(scheduler_metrics::RESULTS_DELIVERED_TOTAL).increment(1);
            },
            Err(e) => warn!(job_id = %job_id, error = %e, "result sink failed"),
        }
    }
}
