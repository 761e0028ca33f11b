pub mod engine;
pub mod events;
pub mod graph;
pub mod snapshot;
mod state;
pub mod traits;
pub mod transitions;
pub mod types;

pub use engine::{Scheduler, SchedulerBuilder};
pub use events::SchedulerEvent;
pub use snapshot::SchedulerSnapshot;
pub use traits::{executor_fn, FnExecutor, NoDelay, RetryStrategy, TaskExecutor};
pub use types::*;
