use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::EventsOutConfig;

fn audit_preview(s: &str) -> String {
    const MAX: usize = 120;
    if s.len() <= MAX {
        return s.to_string();
    }
    let end = s
        .char_indices()
        .take_while(|(i, _)| *i < MAX)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let mut out = s[..end].to_string();
    out.push('…');
    out
}

#[derive(Clone)]
pub struct EventsOutTx {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
    drop_when_full: bool,
}

impl EventsOutTx {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn send_line(&self, line: String) {
        if self.drop_when_full {
            self.try_send_line(line);
        } else if self.tx.send(line).await.is_err() {
            // writer closed
        }
    }

    /// Non-blocking variant for callers outside an async context.
    /// Lines that do not fit are counted as dropped.
    pub fn try_send_line(&self, line: String) {
        if self.tx.try_send(line).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Spawns the line writer. The returned handle resolves once every
/// [`EventsOutTx`] clone has been dropped and the output is flushed.
pub async fn start_events_out(
    cfg: &EventsOutConfig,
) -> Result<Option<(EventsOutTx, JoinHandle<()>)>, String> {
    if !cfg.enabled || cfg.path.trim().is_empty() {
        return Ok(None);
    }

    let path = cfg.path.clone();
    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if path == "stdout:" {
        Box::new(tokio::io::stdout())
    } else {
        if let Some(parent) = std::path::Path::new(&path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("create events_out dir failed: {e}"))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| format!("open events_out {path} failed: {e}"))?;
        Box::new(file)
    };

    let (tx, mut rx) = mpsc::channel::<String>(cfg.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = dropped.clone();

    let handle = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if path == "stdout:" {
                tracing::debug!(
                    target: "harvest.stdout_audit",
                    kind = "events_out",
                    bytes = line.len(),
                    preview = %audit_preview(line.trim_end())
                );
            }
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!("events_out write failed: {e}");
                return;
            }
        }

        let _ = writer.flush().await;
        let dropped = dropped_clone.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "events_out dropped lines because the channel was full");
        }
    });

    Ok(Some((
        EventsOutTx {
            tx,
            dropped,
            drop_when_full: cfg.drop_when_full,
        },
        handle,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lines_reach_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("events.jsonl");
        let cfg = EventsOutConfig {
            enabled: true,
            path: path.to_string_lossy().to_string(),
            channel_capacity: 8,
            drop_when_full: false,
        };

        let (tx, handle) = start_events_out(&cfg).await.unwrap().unwrap();
        tx.send_line("{\"a\":1}".to_string()).await;
        tx.send_line("{\"a\":2}\n".to_string()).await;
        drop(tx);
        handle.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[tokio::test]
    async fn test_disabled_returns_none() {
        let cfg = EventsOutConfig::default();
        assert!(start_events_out(&cfg).await.unwrap().is_none());
    }

    #[test]
    fn test_audit_preview_truncates_on_char_boundary() {
        let s = "é".repeat(100);
        let preview = audit_preview(&s);
        assert!(preview.ends_with('…'));
        assert!(preview.len() < s.len());
    }
}
