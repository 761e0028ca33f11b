pub mod engine;
pub mod progress;
pub mod registry;
pub mod report;
pub mod source;

pub use engine::{Orchestrator, OrchestratorBuilder};
pub use progress::{ProgressMonitor, ProgressReporter};
pub use registry::{Collector, CollectorFactory, CollectorRegistry};
pub use report::{format_duration, success_rate, BatchReport, SourceOutcome, Totals, TypeMetrics};
pub use source::{group_by_type, load_sources, parse_sources, Source, SourceListFormat, SourceType};
