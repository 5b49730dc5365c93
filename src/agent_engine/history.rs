use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent_engine::events::StepResult;
use crate::errors::AutoGlmResult;

/// Step results of the current run, in step order.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    steps: Vec<StepResult>,
}

impl StepLog {
    pub fn push(&mut self, step: StepResult) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub session_id: String,
    pub event: serde_json::Value,
}

/// Appends run events to `session_<uuid>.jsonl`, one JSON object per line.
pub struct SessionRecorder {
    pub session_id: String,
    file_path: PathBuf,
}

impl SessionRecorder {
    /// Records under the platform data directory.
    pub fn new() -> Self {
        Self::in_dir(&sessions_dir())
    }

    pub fn in_dir(dir: &Path) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Self {
            session_id,
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn record<T: Serialize>(&self, event: &T) -> AutoGlmResult<()> {
        let entry = HistoryEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            session_id: self.session_id.clone(),
            event: serde_json::to_value(event)?,
        };
        let line = serde_json::to_string(&entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %self.file_path.display(), "history entry flushed");
        Ok(())
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// `<data dir>/autoglm/sessions`, falling back to the working directory.
fn sessions_dir() -> PathBuf {
    if let Some(base) = dirs::data_dir() {
        let d = base.join("autoglm").join("sessions");
        match std::fs::create_dir_all(&d) {
            Ok(()) => return d,
            Err(e) => tracing::warn!(path = %d.display(), error = %e, "cannot create sessions dir"),
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::events::AgentEvent;

    #[test]
    fn recorder_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SessionRecorder::in_dir(dir.path());
        recorder
            .record(&AgentEvent::Thinking { chunk: "x".into() })
            .unwrap();
        recorder
            .record(&AgentEvent::Error {
                message: "boom".into(),
            })
            .unwrap();
        let text = std::fs::read_to_string(recorder.path()).unwrap();
        let lines: Vec<HistoryEntry> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].event["type"], "error");
        assert_eq!(lines[0].session_id, recorder.session_id);
    }
}
