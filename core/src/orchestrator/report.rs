use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::source::SourceType;
use crate::scheduler::TaskStatus;

/// Outcome of one source within a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why a source was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Totals {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationSummary {
    pub seconds: f64,
    pub human: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeMetrics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub average_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: Totals,
    pub duration: DurationSummary,
    pub by_type: BTreeMap<String, TypeMetrics>,
    pub successful: Vec<SourceOutcome>,
    pub failed: Vec<SourceOutcome>,
    pub skipped: Vec<SourceOutcome>,
}

impl BatchReport {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        successful: Vec<SourceOutcome>,
        failed: Vec<SourceOutcome>,
        skipped: Vec<SourceOutcome>,
    ) -> Self {
        let total = successful.len() + failed.len() + skipped.len();
        let totals = Totals {
            total,
            successful: successful.len(),
            failed: failed.len(),
            skipped: skipped.len(),
            success_rate: success_rate(successful.len(), total),
        };

        let elapsed_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let duration = DurationSummary {
            seconds: elapsed_ms as f64 / 1000.0,
            human: format_duration(elapsed_ms / 1000),
        };

        let mut by_type: BTreeMap<String, TypeMetrics> = BTreeMap::new();
        let mut durations: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for outcome in &successful {
            let key = outcome.source_type.to_string();
            let m = by_type.entry(key.clone()).or_default();
            m.total += 1;
            m.successful += 1;
            if let Some(d) = outcome.duration_ms {
                durations.entry(key).or_default().push(d);
            }
        }
        for outcome in &failed {
            let m = by_type.entry(outcome.source_type.to_string()).or_default();
            m.total += 1;
            m.failed += 1;
        }
        for outcome in &skipped {
            let m = by_type.entry(outcome.source_type.to_string()).or_default();
            m.total += 1;
            m.skipped += 1;
        }
        for (key, values) in durations {
            if let Some(m) = by_type.get_mut(&key) {
                m.average_duration_ms = values.iter().sum::<u64>() as f64 / values.len() as f64;
            }
        }

        Self {
            started_at,
            finished_at,
            totals,
            duration,
            by_type,
            successful,
            failed,
            skipped,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0
    }
}

/// `successful / total * 100` with one decimal; "0.0" for an empty batch.
pub fn success_rate(successful: usize, total: usize) -> String {
    if total == 0 {
        return "0.0".to_string();
    }
    format!("{:.1}", successful as f64 / total as f64 * 100.0)
}

/// Human readable duration: "45s", "2m 5s", "1h 0m 5s".
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
