//! Core data types for job bindings and their run state.

use std::{borrow::Borrow, fmt};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

/// Group every job and trigger is registered under.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Suffix appended to a job id to name its trigger.
pub const TRIGGER_NAME_SUFFIX: &str = "_trigger";

/// Identifier of a scheduled job, unique within [`DEFAULT_GROUP`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidJobId {
                reason: "job id must not be empty".into(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the trigger registered for this job.
    pub fn trigger_key(&self) -> TriggerKey {
        TriggerKey {
            name: format!("{}{TRIGGER_NAME_SUFFIX}", self.0),
            group: DEFAULT_GROUP.to_string(),
        }
    }
}

impl TryFrom<String> for JobId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for JobId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name and group of a registered trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TriggerSpec {
    /// Cron expression (6/7-field with seconds, or 5-field standard).
    Cron { expression: String },
    /// Fire every `seconds`, forever, after `initial_delay_secs`.
    Interval {
        seconds: u64,
        #[serde(default)]
        initial_delay_secs: u64,
    },
}

impl TriggerSpec {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    pub fn interval(seconds: u64) -> Self {
        Self::Interval {
            seconds,
            initial_delay_secs: 0,
        }
    }

    pub fn interval_with_delay(seconds: u64, initial_delay_secs: u64) -> Self {
        Self::Interval {
            seconds,
            initial_delay_secs,
        }
    }
}

/// What runs when a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobTarget {
    /// An external task looked up in the daemon registry.
    Daemon { entry_id: String },
    /// A natively executable job, by registered type name.
    Native { type_name: String },
}

/// Request to bind a job to a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBinding {
    pub job_id: JobId,
    pub trigger: TriggerSpec,
    pub target: JobTarget,
    /// Must not run concurrently across cluster nodes.
    #[serde(default)]
    pub cluster_affinity: bool,
}

impl JobBinding {
    /// Binding for a daemon entry, using the entry id as job id.
    pub fn daemon(entry_id: &JobId, trigger: TriggerSpec) -> Self {
        Self {
            job_id: entry_id.clone(),
            trigger,
            target: JobTarget::Daemon {
                entry_id: entry_id.to_string(),
            },
            cluster_affinity: false,
        }
    }

    pub fn native(job_id: JobId, type_name: impl Into<String>, trigger: TriggerSpec) -> Self {
        Self {
            job_id,
            trigger,
            target: JobTarget::Native {
                type_name: type_name.into(),
            },
            cluster_affinity: false,
        }
    }

    #[must_use]
    pub fn with_cluster_affinity(mut self, cluster_affinity: bool) -> Self {
        self.cluster_affinity = cluster_affinity;
        self
    }

    pub fn detail(&self) -> JobDetail {
        JobDetail {
            job_id: self.job_id.clone(),
            target: self.target.clone(),
        }
    }
}

/// The job half of a binding, as held by an engine and handed to each fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub job_id: JobId,
    pub target: JobTarget,
}

impl JobDetail {
    /// Daemon entry id carried by this job, if any.
    pub fn daemon_entry_id(&self) -> Option<&str> {
        match &self.target {
            JobTarget::Daemon { entry_id } => Some(entry_id),
            JobTarget::Native { .. } => None,
        }
    }
}

/// Which of the two engine instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineKind {
    Local,
    Clustered,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Clustered => "clustered",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    Stopped,
    Running,
}

/// Everything a running unit (and the listener) knows about the current fire.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: JobDetail,
    pub engine: EngineKind,
    pub fired_at: DateTime<Utc>,
    /// Planned fire time; `None` for out-of-band fires.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl JobContext {
    pub fn is_out_of_band(&self) -> bool {
        self.scheduled_at.is_none()
    }
}

/// What came out of one fire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FireOutcome {
    /// Textual result returned by the unit.
    pub result: Option<String>,
    /// Failure message when resolution or the job body failed.
    pub failure: Option<String>,
}

impl FireOutcome {
    pub fn completed(result: Option<String>) -> Self {
        Self {
            result,
            failure: None,
        }
    }

    pub fn failed(failure: impl Into<String>) -> Self {
        Self {
            result: None,
            failure: Some(failure.into()),
        }
    }

    pub fn execution_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Run state of one job, as seen by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_end: Option<DateTime<Utc>>,
    pub in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
}

impl ExecutionRecord {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            last_run_start: None,
            last_run_end: None,
            in_progress: false,
            last_result: None,
        }
    }
}

/// Payload delivered to the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionResult {
    pub job_id: JobId,
    pub executed_at: DateTime<Utc>,
    pub result: String,
}

/// Status of one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub kind: EngineKind,
    pub instance_name: String,
    pub state: EngineState,
    pub binding_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_fire_at: Option<DateTime<Utc>>,
}

/// Summary of the scheduling service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub cluster_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<EngineStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clustered: Option<EngineStatus>,
}
