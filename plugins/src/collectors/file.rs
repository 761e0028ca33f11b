use std::path::Path;

use async_trait::async_trait;
use harvest_core::orchestrator::{Collector, Source};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::type_dir;

/// Copies a local file (`path`) into `<output>/<type>/<file name>`.
#[derive(Debug, Default, Clone)]
pub struct FileCollector;

impl FileCollector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Collector for FileCollector {
    fn name(&self) -> &str {
        "file"
    }

    async fn collect(
        &self,
        source: &Source,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        let src = source
            .path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("source '{}' has no path", source.id))?;
        let file_name = src
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("source '{}' path has no file name", source.id))?;

        if cancel.is_cancelled() {
            anyhow::bail!("cancelled");
        }

        let dest = type_dir(output_dir, source).await?.join(file_name);
        let bytes = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled"),
            res = tokio::fs::copy(src, &dest) => res.map_err(|e| {
                anyhow::anyhow!("copy {} -> {} failed: {e}", src.display(), dest.display())
            })?,
        };

        tracing::debug!(source = %source.id, dest = %dest.display(), bytes, "file collected");
        Ok(json!({
            "path": dest.to_string_lossy(),
            "bytes": bytes,
        }))
    }
}
