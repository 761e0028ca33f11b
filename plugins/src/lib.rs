pub mod collectors;
pub mod factory;
pub mod reporters;
pub mod strategies;

pub use collectors::{FileCollector, HttpCollector};
pub use factory::{build_collector, build_reporter, build_retry_strategy, DefaultCollectorFactory};
pub use reporters::{JsonlReporter, TextReporter};
pub use strategies::{ExponentialBackoff, LinearBackoff};
