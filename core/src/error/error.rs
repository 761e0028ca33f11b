use thiserror::Error;

use super::{OrchestratorError, SchedulerError};

/// Process-level error codes shared by the CLI exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    GeneralError = 1,
    ValidationError = 3,
    CircularDependency = 12,
    ConfigError = 11,
    SourceListError = 21,
    IoError = 20,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("collection failed: {0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
