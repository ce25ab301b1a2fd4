//! Daemon-facing scheduler: schedules daemon entries through a shared
//! [`SchedulingService`].

use std::sync::Arc;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tracing::warn,
    vigil_config::{DaemonConfig, VigilConfig},
};

use crate::{
    Result,
    service::SchedulingService,
    types::{JobBinding, JobId, TriggerSpec},
};

/// A daemon registered with the host, scheduled by cron or fixed interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonEntry {
    pub id: JobId,
    /// Takes precedence over `interval_secs` when non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default)]
    pub interval_secs: u64,
}

impl DaemonEntry {
    pub fn new(id: JobId, interval_secs: u64) -> Self {
        Self {
            id,
            cron: None,
            interval_secs,
        }
    }

    #[must_use]
    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = Some(cron.into());
        self
    }

    /// Build an entry from its `[daemons.<id>]` config table.
    pub fn from_config(id: &str, config: &DaemonConfig) -> Result<Self> {
        Ok(Self {
            id: JobId::new(id)?,
            cron: config.cron.clone(),
            interval_secs: config.interval_secs.unwrap_or_default(),
        })
    }

    pub fn trigger(&self) -> TriggerSpec {
        match self.cron.as_deref().map(str::trim) {
            Some(cron) if !cron.is_empty() => TriggerSpec::cron(cron),
            _ => TriggerSpec::interval(self.interval_secs),
        }
    }
}

pub struct DaemonScheduler {
    service: Arc<SchedulingService>,
    config: Arc<VigilConfig>,
}

impl DaemonScheduler {
    pub fn new(service: Arc<SchedulingService>, config: Arc<VigilConfig>) -> Self {
        Self { service, config }
    }

    /// Schedule the entry; cluster affinity comes from its config table.
    pub async fn schedule(&self, entry: &DaemonEntry) -> Option<DateTime<Utc>> {
        let affinity = self
            .config
            .disallows_cluster_concurrency(entry.id.as_str());
        let binding = JobBinding::daemon(&entry.id, entry.trigger()).with_cluster_affinity(affinity);
        self.service.schedule(binding).await
    }

    pub async fn unschedule(&self, entry: &DaemonEntry) {
        self.service.unschedule(entry.id.as_str()).await;
    }

    /// Run the entry now. Only entries that are already scheduled can run.
    pub async fn enqueue(&self, entry: &DaemonEntry) -> bool {
        let accepted = self.service.execute_now(entry.id.as_str()).await;
        if !accepted {
            warn!(entry_id = %entry.id, "daemon entry not scheduled, cannot run now");
        }
        accepted
    }

    pub fn is_valid_cron_expression(&self, expression: &str) -> bool {
        self.service.is_valid_cron(expression)
    }

    /// Nothing to do: engine lifetime belongs to the service.
    pub fn shutdown(&self) {}
}
