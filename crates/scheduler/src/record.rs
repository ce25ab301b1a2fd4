//! Execution record table owned by the scheduling service.

use std::{collections::HashMap, sync::RwLock};

use chrono::{DateTime, Utc};

use crate::types::{ExecutionRecord, JobId};

/// Per-job run state. Each operation reads or rewrites a single record
/// under the table lock, so a record is never observed half-updated.
#[derive(Debug, Default)]
pub struct ExecutionRecords {
    records: RwLock<HashMap<JobId, ExecutionRecord>>,
}

impl ExecutionRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<ExecutionRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(job_id).cloned()
    }

    /// Snapshot of every record, sorted by job id.
    pub fn all(&self) -> Vec<ExecutionRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        all
    }

    /// A fire started: creates the record on first use.
    pub fn begin(&self, job_id: &JobId, at: DateTime<Utc>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(job_id.clone())
            .or_insert_with(|| ExecutionRecord::new(job_id.clone()));
        record.last_run_start = Some(at);
        record.last_run_end = None;
        record.in_progress = true;
    }

    /// A fire ended. End time and result are only recorded when the unit
    /// produced a result. A record removed while the fire ran stays removed.
    pub fn finish(&self, job_id: &JobId, at: DateTime<Utc>, result: Option<&str>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let Some(record) = records.get_mut(job_id) else {
            return;
        };
        record.in_progress = false;
        if let Some(result) = result {
            record.last_run_end = Some(at);
            record.last_result = Some(result.to_string());
        }
    }

    pub fn remove(&self, job_id: &str) -> Option<ExecutionRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
