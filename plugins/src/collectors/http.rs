use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::config::CollectorConfig;
use harvest_core::orchestrator::{Collector, Source};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{slug, type_dir};

const DEFAULT_USER_AGENT: &str = concat!("harvest/", env!("CARGO_PKG_VERSION"));

/// Downloads `url` into `<output>/<type>/<slug>.html`.
pub struct HttpCollector {
    http: reqwest::Client,
}

impl HttpCollector {
    pub fn new(config: &CollectorConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(
            config
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        );
        if let Some(ms) = config.timeout_ms.filter(|ms| *ms > 0) {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let http = builder
            .build()
            .map_err(|e| anyhow::anyhow!("build http client failed: {e}"))?;
        Ok(Self { http })
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<(u16, Vec<u8>)> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("request {url} failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("GET {url} returned {status}");
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| anyhow::anyhow!("read body of {url} failed: {e}"))?;
        Ok((status.as_u16(), body.to_vec()))
    }
}

#[async_trait]
impl Collector for HttpCollector {
    fn name(&self) -> &str {
        "http"
    }

    async fn collect(
        &self,
        source: &Source,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        let url = source
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("source '{}' has no url", source.id))?;

        let (status, body) = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled"),
            res = self.fetch(url) => res?,
        };

        let dest = type_dir(output_dir, source)
            .await?
            .join(format!("{}.html", slug(&source.id)));
        tokio::fs::write(&dest, &body)
            .await
            .map_err(|e| anyhow::anyhow!("write {} failed: {e}", dest.display()))?;

        tracing::debug!(source = %source.id, %url, status, bytes = body.len(), "page collected");
        Ok(json!({
            "url": url,
            "status": status,
            "path": dest.to_string_lossy(),
            "bytes": body.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::orchestrator::SourceType;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response per connection.
    async fn serve(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}/post")
    }

    /// Accepts connections and never answers.
    async fn black_hole() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        format!("http://{addr}/slow")
    }

    #[tokio::test]
    async fn test_downloads_page_into_type_dir() {
        let url = serve("200 OK", "<h1>hi</h1>").await;
        let output = tempfile::tempdir().unwrap();
        let collector = HttpCollector::new(&CollectorConfig::default()).unwrap();
        let source = Source::new("Post 1", SourceType::Blog).with_url(&url);

        let result = collector
            .collect(&source, output.path(), &CancellationToken::new())
            .await
            .unwrap();

        let dest = output.path().join("blog").join("post-1.html");
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "<h1>hi</h1>");
        assert_eq!(result["status"], 200);
        assert_eq!(result["bytes"], 11);
        assert_eq!(result["url"], url.as_str());
    }

    #[tokio::test]
    async fn test_error_status_fails_the_attempt() {
        let url = serve("404 Not Found", "missing").await;
        let output = tempfile::tempdir().unwrap();
        let collector = HttpCollector::new(&CollectorConfig::default()).unwrap();
        let source = Source::new("gone", SourceType::Blog).with_url(&url);

        let err = collector
            .collect(&source, output.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
        assert!(!output.path().join("blog").exists());
    }

    #[tokio::test]
    async fn test_missing_url_is_an_error() {
        let output = tempfile::tempdir().unwrap();
        let collector = HttpCollector::new(&CollectorConfig::default()).unwrap();
        let source = Source::new("offline", SourceType::Blog);
        let err = collector
            .collect(&source, output.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "source 'offline' has no url");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_request() {
        let url = black_hole().await;
        let output = tempfile::tempdir().unwrap();
        let collector = HttpCollector::new(&CollectorConfig::default()).unwrap();
        let source = Source::new("slow", SourceType::Blog).with_url(url);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            collector.collect(&source, output.path(), &token),
        )
        .await
        .expect("collector ignored cancellation")
        .unwrap_err();
        assert_eq!(err.to_string(), "cancelled");
    }

    #[tokio::test]
    async fn test_timeout_from_config() {
        let url = black_hole().await;
        let output = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            timeout_ms: Some(100),
            ..CollectorConfig::default()
        };
        let collector = HttpCollector::new(&config).unwrap();
        let source = Source::new("slow", SourceType::Blog).with_url(url);

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            collector.collect(&source, output.path(), &CancellationToken::new()),
        )
        .await
        .expect("client timeout not applied")
        .unwrap_err();
        assert!(err.to_string().starts_with("request "), "{err}");
    }
}
