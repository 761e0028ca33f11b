pub mod config;
pub mod metrics;
pub mod task;

pub use config::*;
pub use metrics::*;
pub use task::*;
