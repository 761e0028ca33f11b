use std::sync::Arc;

use anyhow::Result;

use harvest_core::config::{CollectorConfig, RetryConfig};
use harvest_core::events_out::EventsOutTx;
use harvest_core::orchestrator::{
    Collector, CollectorFactory, ProgressMonitor, ProgressReporter, SourceType,
};
use harvest_core::scheduler::{NoDelay, RetryStrategy};

use crate::collectors::{FileCollector, HttpCollector};
use crate::reporters::{JsonlReporter, TextReporter};
use crate::strategies::{ExponentialBackoff, LinearBackoff};

pub fn build_retry_strategy(cfg: &RetryConfig) -> Result<Arc<dyn RetryStrategy>> {
    match cfg.strategy.as_str() {
        "none" => Ok(Arc::new(NoDelay)),
        "linear" => Ok(Arc::new(LinearBackoff::new(cfg))),
        "exponential-backoff" => Ok(Arc::new(ExponentialBackoff::new(cfg))),
        other => anyhow::bail!("unknown retry strategy '{other}'"),
    }
}

/// Collector kind used when `[collectors.<type>]` does not name one.
fn default_kind(source_type: &SourceType) -> Option<&'static str> {
    match source_type {
        SourceType::Blog => Some("http"),
        SourceType::Pdf => Some("file"),
        _ => None,
    }
}

pub fn build_collector(kind: &str, cfg: &CollectorConfig) -> Result<Arc<dyn Collector>> {
    match kind {
        "http" => Ok(Arc::new(HttpCollector::new(cfg)?)),
        "file" => Ok(Arc::new(FileCollector::new())),
        other => anyhow::bail!("unknown collector kind '{other}'"),
    }
}

/// Serves blog pages over HTTP and PDFs from disk out of the box; any other
/// type needs a `kind` in its config section.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCollectorFactory;

impl CollectorFactory for DefaultCollectorFactory {
    fn default_types(&self) -> Vec<SourceType> {
        vec![SourceType::Blog, SourceType::Pdf]
    }

    fn create(
        &self,
        source_type: &SourceType,
        config: &CollectorConfig,
    ) -> Result<Option<Arc<dyn Collector>>> {
        let kind = match config.kind.as_deref().or_else(|| default_kind(source_type)) {
            Some(kind) => kind,
            None => {
                tracing::warn!(%source_type, "no collector kind configured; sources of this type will fail");
                return Ok(None);
            }
        };
        build_collector(kind, config).map(Some)
    }
}

/// Reporter for a `--format` value. `None` for "none".
pub fn build_reporter(
    format: &str,
    events_out: Option<EventsOutTx>,
    interactive: bool,
) -> Result<Option<Box<dyn ProgressReporter>>> {
    match format {
        "progress" => Ok(Some(Box::new(ProgressMonitor::new(0, interactive)))),
        "text" => Ok(Some(Box::new(TextReporter::new(!interactive)))),
        "jsonl" => {
            let out = events_out
                .ok_or_else(|| anyhow::anyhow!("jsonl output requires an events sink"))?;
            Ok(Some(Box::new(JsonlReporter::new(out))))
        }
        "none" => Ok(None),
        other => anyhow::bail!("unknown output format '{other}'"),
    }
}
