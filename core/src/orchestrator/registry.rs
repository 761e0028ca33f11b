use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::source::{Source, SourceType};
use crate::config::CollectorConfig;

/// Fetches one source into the output directory.
///
/// Returning `Err` counts as a failed attempt and may be retried, so
/// implementations should be safe to run more than once per source.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(
        &self,
        source: &Source,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Value>;
}

/// Builds collectors from `[collectors.<type>]` configuration.
pub trait CollectorFactory: Send + Sync {
    /// Types served even when they have no configuration section.
    fn default_types(&self) -> Vec<SourceType> {
        Vec::new()
    }

    /// `Ok(None)` leaves the type unregistered.
    fn create(
        &self,
        source_type: &SourceType,
        config: &CollectorConfig,
    ) -> anyhow::Result<Option<Arc<dyn Collector>>>;
}

impl<F> CollectorFactory for F
where
    F: Fn(&SourceType, &CollectorConfig) -> anyhow::Result<Option<Arc<dyn Collector>>>
        + Send
        + Sync,
{
    fn create(
        &self,
        source_type: &SourceType,
        config: &CollectorConfig,
    ) -> anyhow::Result<Option<Arc<dyn Collector>>> {
        self(source_type, config)
    }
}

/// Source type → collector lookup, built once per orchestrator.
#[derive(Default, Clone)]
pub struct CollectorRegistry {
    collectors: HashMap<SourceType, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_type: SourceType, collector: Arc<dyn Collector>) {
        tracing::debug!(%source_type, collector = collector.name(), "collector registered");
        self.collectors.insert(source_type, collector);
    }

    pub fn get(&self, source_type: &SourceType) -> Option<Arc<dyn Collector>> {
        self.collectors.get(source_type).cloned()
    }

    pub fn contains(&self, source_type: &SourceType) -> bool {
        self.collectors.contains_key(source_type)
    }

    pub fn types(&self) -> Vec<SourceType> {
        let mut types: Vec<_> = self.collectors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
