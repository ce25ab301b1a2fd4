//! Daemons backed by shell commands, and a sink that logs their results.

use std::{path::PathBuf, process::Stdio};

use {
    async_trait::async_trait,
    tokio::process::Command,
    tracing::{debug, info},
    vigil_config::DaemonConfig,
    vigil_scheduler::{Daemon, Error, JobExecutionResult, Result, ResultSink, error::Context},
};

/// Runs a program and returns its trimmed stdout. Empty output is no result,
/// a non-zero exit status is a failure.
#[derive(Debug, Clone)]
pub struct CommandDaemon {
    entry_id: String,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandDaemon {
    pub fn new(entry_id: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// `None` when the table declares no command.
    pub fn from_config(entry_id: &str, config: &DaemonConfig) -> Option<Self> {
        let program = config.command.as_deref()?.trim();
        if program.is_empty() {
            return None;
        }
        Some(Self::new(entry_id, program, config.args.clone()))
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Daemon for CommandDaemon {
    async fn run(&self) -> Result<Option<String>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(entry_id = %self.entry_id, program = %self.program, "running daemon command");
        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::message(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        Ok((!stdout.is_empty()).then(|| stdout.to_string()))
    }
}

/// Writes every delivered result to the log.
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn job_executed(&self, result: &JobExecutionResult) -> Result<()> {
        info!(
            job_id = %result.job_id,
            executed_at = %result.executed_at,
            result = %result.result,
            "job result"
        );
        Ok(())
    }
}
