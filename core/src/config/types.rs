use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scheduler::SchedulerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Per source type settings, keyed by type tag (`[collectors.youtube]`).
    #[serde(default)]
    pub collectors: BTreeMap<String, CollectorConfig>,

    #[serde(default)]
    pub events_out: EventsOutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "harvest_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// "none", "linear" or "exponential-backoff".
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_retry_strategy() -> String {
    "none".to_string()
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Type assigned to sources that do not declare one.
    #[serde(default = "default_source_type")]
    pub default_source_type: String,

    /// Show progress bars while collecting.
    #[serde(default = "default_progress")]
    pub progress: bool,
}

fn default_source_type() -> String {
    "blog".to_string()
}

fn default_progress() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_source_type: default_source_type(),
            progress: default_progress(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Which reference collector backs this type: "http" or "file".
    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default = "default_collector_enabled")]
    pub enabled: bool,

    /// Overrides `scheduler.max_retries` for sources of this type.
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_collector_enabled() -> bool {
    true
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            kind: None,
            enabled: default_collector_enabled(),
            max_retries: None,
            timeout_ms: None,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsOutConfig {
    pub enabled: bool,
    /// File path, or "stdout:".
    pub path: String,
    pub channel_capacity: usize,
    pub drop_when_full: bool,
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./harvest.events.jsonl".to_string(),
            channel_capacity: 2048,
            drop_when_full: true,
        }
    }
}

impl AppConfig {
    /// Retry override for a source type, if configured.
    pub fn max_retries_for(&self, source_type: &str) -> Option<u32> {
        self.collectors
            .get(source_type)
            .and_then(|c| c.max_retries)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.max_concurrent == 0 {
            anyhow::bail!("scheduler.max_concurrent must be at least 1");
        }
        if self.events_out.enabled && self.events_out.channel_capacity == 0 {
            anyhow::bail!("events_out.channel_capacity must be at least 1");
        }
        match self.retry.strategy.as_str() {
            "none" | "linear" | "exponential-backoff" => {}
            other => anyhow::bail!("unknown retry strategy '{other}'"),
        }
        for (ty, collector) in &self.collectors {
            if let Some(kind) = collector.kind.as_deref() {
                if !matches!(kind, "http" | "file") {
                    anyhow::bail!("collectors.{ty}.kind must be \"http\" or \"file\", got '{kind}'");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.scheduler.max_concurrent, 3);
        assert_eq!(cfg.scheduler.max_retries, 3);
        assert_eq!(cfg.scheduler.persist_interval_ms, 30_000);
        assert!(cfg.scheduler.cascade_failures);
        assert_eq!(cfg.orchestrator.default_source_type, "blog");
        assert_eq!(cfg.retry.strategy, "none");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_collector_sections() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [scheduler]
            max_concurrent = 5
            state_file = "state.json"

            [collectors.youtube]
            kind = "http"
            max_retries = 1

            [collectors.pdf]
            kind = "file"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scheduler.max_concurrent, 5);
        assert_eq!(cfg.max_retries_for("youtube"), Some(1));
        assert_eq!(cfg.max_retries_for("pdf"), None);
        assert_eq!(cfg.max_retries_for("blog"), None);
        assert!(cfg.collectors["pdf"].enabled);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut cfg = AppConfig::default();
        cfg.scheduler.max_concurrent = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_kind() {
        let cfg: AppConfig = toml::from_str("[collectors.blog]\nkind = \"ftp\"\n").unwrap();
        assert!(cfg.validate().is_err());
    }
}
