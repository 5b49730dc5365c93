use serde::{Deserialize, Serialize};

use crate::errors::AutoGlmResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Plans the task and picks each step; never sees the screen.
    Decision,
    /// Reads the screen and carries out decisions.
    Vision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStage {
    #[default]
    Idle,
    Analyzing,
    Deciding,
    Generating,
    Capturing,
    Recognizing,
    Executing,
    Waiting,
}

/// Operation chosen by the decision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Tap,
    Swipe,
    Type,
    Scroll,
    Back,
    Home,
    Launch,
    Finish,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionAction::Tap => "tap",
            DecisionAction::Swipe => "swipe",
            DecisionAction::Type => "type",
            DecisionAction::Scroll => "scroll",
            DecisionAction::Back => "back",
            DecisionAction::Home => "home",
            DecisionAction::Launch => "launch",
            DecisionAction::Finish => "finish",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    /// Free-text description of the element to act on.
    #[serde(default)]
    pub target: String,
    /// Text to type, scroll direction or app name, depending on `action`.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub finished: bool,
    /// Only meaningful once `finished` is set.
    #[serde(default = "default_true")]
    pub success: bool,
}

fn default_true() -> bool {
    true
}

impl Decision {
    pub fn finish(message: impl Into<String>, success: bool) -> Self {
        Self {
            action: DecisionAction::Finish,
            target: String::new(),
            content: String::new(),
            reasoning: message.into(),
            finished: true,
            success,
        }
    }

    /// The part handed to the vision side.
    pub fn request(&self) -> ActionRequest {
        ActionRequest {
            action: self.action,
            target: self.target.clone(),
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: DecisionAction,
    pub target: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub estimated_actions: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenDescription {
    pub description: String,
    pub current_app: String,
    pub elements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action_type: String,
    pub target: String,
    /// Device pixel position acted on, when the action has one.
    pub position: Option<[i32; 2]>,
    pub success: bool,
    pub finished: bool,
    pub message: String,
}

// ── Events ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DualModelPayload {
    DecisionStart {
        stage: ModelStage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<String>,
    },
    DecisionThinking {
        chunk: String,
    },
    DecisionResult {
        decision: Decision,
        reasoning: String,
    },
    TaskPlan {
        plan: TaskPlan,
    },
    /// Text the decision model wrote for the device to type.
    ContentGeneration {
        content: String,
        purpose: String,
    },
    VisionStart {
        stage: ModelStage,
    },
    VisionRecognition(ScreenDescription),
    ActionStart {
        action: ActionRequest,
    },
    ActionResult(ExecutionResult),
    StepComplete {
        success: bool,
        finished: bool,
    },
    StepFailed {
        message: String,
    },
    TaskComplete {
        success: bool,
        message: String,
        steps: u32,
    },
    Error {
        message: String,
    },
    Aborted {
        message: String,
    },
}

impl DualModelPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            DualModelPayload::DecisionStart { .. } => "decision_start",
            DualModelPayload::DecisionThinking { .. } => "decision_thinking",
            DualModelPayload::DecisionResult { .. } => "decision_result",
            DualModelPayload::TaskPlan { .. } => "task_plan",
            DualModelPayload::ContentGeneration { .. } => "content_generation",
            DualModelPayload::VisionStart { .. } => "vision_start",
            DualModelPayload::VisionRecognition(_) => "vision_recognition",
            DualModelPayload::ActionStart { .. } => "action_start",
            DualModelPayload::ActionResult(_) => "action_result",
            DualModelPayload::StepComplete { .. } => "step_complete",
            DualModelPayload::StepFailed { .. } => "step_failed",
            DualModelPayload::TaskComplete { .. } => "task_complete",
            DualModelPayload::Error { .. } => "error",
            DualModelPayload::Aborted { .. } => "aborted",
        }
    }
}

/// One dual-model event. Serialises flat:
/// `{"type": "...", "model": "decision", "step": 2, "timestamp": ..., <payload fields>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualModelEvent {
    #[serde(flatten)]
    pub payload: DualModelPayload,
    pub model: Option<ModelRole>,
    pub step: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl DualModelEvent {
    pub fn new(payload: DualModelPayload, model: Option<ModelRole>, step: u32) -> Self {
        Self {
            payload,
            model,
            step,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn to_sse(&self) -> AutoGlmResult<String> {
        let data = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {data}\n\n", self.kind()))
    }
}

// ── State snapshot ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionSideState {
    pub active: bool,
    pub stage: ModelStage,
    pub thinking: String,
    pub result: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionSideState {
    pub active: bool,
    pub stage: ModelStage,
    pub description: String,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub current_step: u32,
    pub total_steps: u32,
    pub task_plan: Vec<String>,
}

/// What each model is doing right now, for status displays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DualModelState {
    pub decision: DecisionSideState,
    pub vision: VisionSideState,
    pub progress: ProgressState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialise_flat() {
        let event = DualModelEvent {
            payload: DualModelPayload::DecisionStart {
                stage: ModelStage::Analyzing,
                task: Some("发微博".into()),
            },
            model: Some(ModelRole::Decision),
            step: 0,
            timestamp: 1.5,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "type": "decision_start",
                "stage": "analyzing",
                "task": "发微博",
                "model": "decision",
                "step": 0,
                "timestamp": 1.5
            })
        );

        let sse = DualModelEvent::new(
            DualModelPayload::StepComplete {
                success: true,
                finished: false,
            },
            None,
            3,
        )
        .to_sse()
        .unwrap();
        assert!(sse.starts_with("event: step_complete\ndata: {"));
        assert!(sse.contains("\"model\":null"));
    }

    #[test]
    fn decision_defaults() {
        let d: Decision = serde_json::from_str(r#"{"action": "back"}"#).unwrap();
        assert_eq!(d.action, DecisionAction::Back);
        assert!(!d.finished);
        assert!(d.success);
        assert_eq!(d.request().target, "");
    }

    #[test]
    fn state_snapshot_shape() {
        let value = serde_json::to_value(DualModelState::default()).unwrap();
        assert_eq!(value["decision"]["stage"], "idle");
        assert_eq!(value["vision"]["active"], false);
        assert_eq!(value["progress"]["task_plan"], serde_json::json!([]));
    }
}
