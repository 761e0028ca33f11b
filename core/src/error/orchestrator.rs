use std::path::PathBuf;

use thiserror::Error;

use super::{ErrorCode, SchedulerError};

/// Fatal preconditions of a collection batch.
///
/// Per-source failures are not errors: they are counted in the batch report.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("orchestrator not initialized: call initialize() before collect_all()")]
    NotInitialized,

    #[error("collector setup failed: {0}")]
    CollectorSetup(#[source] anyhow::Error),

    #[error("failed to load source list {path:?}: {source}")]
    SourceList {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("scheduler rejected the batch: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("failed to prepare output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OrchestratorError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::GeneralError,
            Self::CollectorSetup(_) => ErrorCode::ConfigError,
            Self::SourceList { .. } => ErrorCode::SourceListError,
            Self::OutputDir { .. } => ErrorCode::IoError,
            Self::Scheduler(e) => e.error_code(),
        }
    }
}
