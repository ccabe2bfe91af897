//! Step history persistence
//!
//! One record per executed step, written after the step completes. Recorder
//! failures are logged and never fail the task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::actions::ActionResult;
use crate::agent::NavigatorState;

/// Everything worth replaying about one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub task_id: String,
    pub step: usize,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigator_state: Option<NavigatorState>,
    pub actions: Vec<serde_json::Value>,
    pub results: Vec<ActionResult>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn record(&self, record: &StepRecord) -> std::io::Result<()>;
}

/// Appends records as JSON lines to a single file.
pub struct JsonlHistoryRecorder {
    path: PathBuf,
}

impl JsonlHistoryRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HistoryRecorder for JsonlHistoryRecorder {
    async fn record(&self, record: &StepRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Discards everything.
pub struct NullRecorder;

#[async_trait]
impl HistoryRecorder for NullRecorder {
    async fn record(&self, _record: &StepRecord) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(step: usize) -> StepRecord {
        StepRecord {
            task_id: "t1".into(),
            step,
            url: "https://example.com".into(),
            title: "Example".into(),
            navigator_state: None,
            actions: vec![serde_json::json!({"click_element": {"index": 1}})],
            results: vec![ActionResult::ok()],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let recorder = JsonlHistoryRecorder::new(&path);

        recorder.record(&sample(0)).await.unwrap();
        recorder.record(&sample(1)).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: StepRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.step, 1);
    }
}
