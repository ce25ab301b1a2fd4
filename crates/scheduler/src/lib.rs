//! Job scheduling with a local and a clustered trigger engine.
//! Jobs resolve on every fire to a native job or a registered daemon.
//! Run state is tracked per job and results go to an optional sink.

pub mod daemon;
pub mod engine;
pub mod error;
pub mod listener;
pub mod record;
pub mod registry_memory;
pub mod resolver;
pub mod service;
pub mod trigger;
pub mod types;

pub use {
    daemon::{DaemonEntry, DaemonScheduler},
    error::{Error, Result},
    listener::{ExecutionListener, RecordingListener, ResultSink},
    resolver::{
        Component, ComponentContainer, Daemon, DaemonRegistry, ExecutableUnit, Job, JobFactory,
        JobResolver,
    },
    service::{SchedulingService, ServiceOptions},
    trigger::is_valid_cron,
    types::{
        EngineKind, ExecutionRecord, JobBinding, JobContext, JobExecutionResult, JobId, JobTarget,
        TriggerSpec,
    },
};
