use thiserror::Error;

use crate::types::EngineKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    CronParse(#[from] cron::error::Error),

    #[error("invalid job id: {reason}")]
    InvalidJobId { reason: String },

    #[error("invalid trigger for {job_id}: {reason}")]
    InvalidTrigger { job_id: String, reason: String },

    #[error("{engine} engine is not running")]
    EngineNotRunning { engine: EngineKind },

    #[error("job {job_id} is already scheduled on the {engine} engine")]
    BindingExists { job_id: String, engine: EngineKind },

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("daemon not found: {entry_id}")]
    DaemonNotFound { entry_id: String },

    #[error("unsupported job type {type_name}: only jobs and daemons are executable")]
    UnsupportedJobType { type_name: String },

    #[error("job instantiation failed for {type_name}: {reason}")]
    Instantiation { type_name: String, reason: String },

    #[error("{message}")]
    Message { message: String },

}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_trigger(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTrigger {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    #[must_use]
    pub fn instantiation(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Instantiation {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

impl vigil_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

vigil_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
