use serde::{Deserialize, Serialize};

use crate::actions::Action;
use crate::errors::AutoGlmResult;

/// Outcome of one observe → decide → act cycle. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based, never reused within a run.
    pub step: u32,
    pub thinking: String,
    pub action: Option<Action>,
    pub success: bool,
    pub finished: bool,
    pub message: Option<String>,
}

impl StepResult {
    /// A step that ended before any action could be chosen.
    pub fn aborted(step: u32, message: impl Into<String>) -> Self {
        Self {
            step,
            thinking: String::new(),
            action: None,
            success: false,
            finished: true,
            message: Some(message.into()),
        }
    }
}

/// Everything a run reports, in order. Serialises as
/// `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { chunk: String },
    Step(StepResult),
    Done {
        message: String,
        steps: u32,
        success: bool,
    },
    Error { message: String },
    Cancelled { message: String },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::Step(_) => "step",
            AgentEvent::Done { .. } => "done",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Cancelled { .. } => "cancelled",
        }
    }

    /// `done` and `cancelled` close a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. } | AgentEvent::Cancelled { .. })
    }

    /// Server-sent-events framing of the JSON form.
    pub fn to_sse(&self) -> AutoGlmResult<String> {
        let data = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {data}\n\n", self.kind()))
    }
}
