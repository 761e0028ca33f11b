//! 调度器状态快照和恢复

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{SchedulerMetrics, TaskRecord};

pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// 调度器快照
///
/// `running` 仅供参考：恢复时这些任务重新排队（至少一次语义）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// 快照版本
    pub version: String,
    /// 快照 ID
    pub snapshot_id: String,
    /// 快照时间
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub queue: Vec<TaskRecord>,
    #[serde(default)]
    pub running: Vec<TaskRecord>,
    #[serde(default)]
    pub completed: Vec<TaskRecord>,
    #[serde(default)]
    pub failed: Vec<TaskRecord>,
    #[serde(default)]
    pub cancelled: Vec<TaskRecord>,
    #[serde(default)]
    pub metrics: SchedulerMetrics,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl Default for SchedulerSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            saved_at: Utc::now(),
            queue: Vec::new(),
            running: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
            metrics: SchedulerMetrics::default(),
            dependencies: BTreeMap::new(),
        }
    }
}

impl SchedulerSnapshot {
    /// 序列化为 JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize snapshot")
    }

    /// 从 JSON 反序列化
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize snapshot")
    }

    /// 保存到文件（临时文件 + rename，保证原子替换）
    ///
    /// 写入紧凑 JSON；阻塞调用，不要在异步 worker 上直接调用。
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec(self).context("Failed to serialize snapshot")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create snapshot directory: {:?}", parent))?;
        }

        let tmp = tmp_path(path);
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("Failed to create {:?}", tmp))?;
            file.write_all(&json)
                .with_context(|| format!("Failed to write snapshot to {:?}", tmp))?;
            file.sync_all().ok();
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move snapshot into place at {:?}", path))
    }

    /// 从文件加载；文件不存在时返回 `None`
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read snapshot from {:?}", path))
            }
        };
        Self::from_json(&json).map(Some)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len() + self.running.len()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::types::TaskStatus;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample() -> SchedulerSnapshot {
        let mut done = TaskRecord::new("a", "blog");
        done.transition_to(TaskStatus::Completed);
        let mut snapshot = SchedulerSnapshot {
            completed: vec![done],
            queue: vec![TaskRecord::new("b", "blog")],
            ..Default::default()
        };
        snapshot
            .dependencies
            .insert("b".to_string(), vec!["a".to_string()]);
        snapshot.metrics.tasks_completed = 1;
        snapshot
    }

    #[test]
    fn test_snapshot_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.json");

        let snapshot = sample();
        snapshot.save_to_file(&path).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());

        let loaded = SchedulerSnapshot::load_from_file(&path).unwrap().unwrap();
        assert_eq!(snapshot, loaded);
    }

    #[test]
    fn test_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = SchedulerSnapshot::load_from_file(temp_dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(SchedulerSnapshot::load_from_file(&path).is_err());
    }

    #[test]
    fn test_snapshot_without_cancelled_field() {
        let json = r#"{
            "version": "1.0.0",
            "snapshot_id": "x",
            "saved_at": "2024-01-01T00:00:00Z",
            "queue": [],
            "running": [],
            "completed": [],
            "failed": [],
            "metrics": {
                "tasks_started": 0, "tasks_completed": 0, "tasks_failed": 0,
                "tasks_retried": 0, "tasks_cancelled": 0, "average_duration_ms": 0.0
            },
            "dependencies": {}
        }"#;
        let snapshot = SchedulerSnapshot::from_json(json).unwrap();
        assert!(snapshot.cancelled.is_empty());
    }
}
