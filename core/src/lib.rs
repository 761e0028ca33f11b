pub mod config;
pub mod error;
pub mod events_out;
pub mod orchestrator;
pub mod scheduler;

pub use error::{OrchestratorError, SchedulerError};
pub use orchestrator::{BatchReport, Orchestrator, Source, SourceType};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerEvent, TaskSpec, TaskStatus};
