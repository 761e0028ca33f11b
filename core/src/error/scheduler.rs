use thiserror::Error;

use super::ErrorCode;

/// Caller misuse of the scheduler API.
///
/// Task execution failures never surface here; they drive the retry state
/// machine and end up in the task record instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("task spec missing required field '{0}'")]
    MissingField(&'static str),

    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("scheduler has been shut down")]
    ShutDown,

    #[error("no tokio runtime available to run tasks")]
    NoRuntime,
}

impl SchedulerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DuplicateTaskId(_) => ErrorCode::ValidationError,
            Self::MissingField(_) => ErrorCode::ValidationError,
            Self::CircularDependency(_) => ErrorCode::CircularDependency,
            Self::ShutDown | Self::NoRuntime => ErrorCode::GeneralError,
        }
    }
}
