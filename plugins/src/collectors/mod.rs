pub mod file;
pub mod http;

pub use file::FileCollector;
pub use http::HttpCollector;

use std::path::{Path, PathBuf};

use harvest_core::orchestrator::Source;

/// File-name-safe form of a source id.
pub(crate) fn slug(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut last_dash = false;
    for ch in id.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let out = out.trim_matches(|c| c == '-' || c == '.').to_string();
    if out.is_empty() {
        "source".to_string()
    } else {
        out
    }
}

/// `<output>/<type>/`, created on demand.
pub(crate) async fn type_dir(output_dir: &Path, source: &Source) -> anyhow::Result<PathBuf> {
    let dir = output_dir.join(source.source_type.as_str());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| anyhow::anyhow!("create output dir {} failed: {e}", dir.display()))?;
    Ok(dir)
}
