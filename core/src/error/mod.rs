#[allow(clippy::module_inception)]
pub mod error;
pub mod orchestrator;
pub mod scheduler;

pub use error::{CliError, ErrorCode};
pub use orchestrator::OrchestratorError;
pub use scheduler::SchedulerError;
