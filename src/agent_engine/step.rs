use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::actions::Action;
use crate::agent_engine::context::ConversationContext;
use crate::agent_engine::event_bus::EventSink;
use crate::agent_engine::events::{AgentEvent, StepResult};
use crate::agent_engine::state::AgentState;
use crate::device::{Device, Screenshot};
use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::executor::{ActionExecutor, ActionResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::CallConfig;

/// Screen state captured at the start of a step.
#[derive(Debug, Clone)]
pub struct Observation {
    pub screenshot: Screenshot,
    pub current_app: String,
}

/// Why a step ended the run abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFault {
    Device(String),
    Model(String),
}

impl StepFault {
    pub fn message(&self) -> &str {
        match self {
            StepFault::Device(m) | StepFault::Model(m) => m,
        }
    }

    pub fn state(&self) -> AgentState {
        match self {
            StepFault::Device(_) => AgentState::DeviceError,
            StepFault::Model(_) => AgentState::ModelError,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub result: StepResult,
    pub fault: Option<StepFault>,
}

impl StepOutcome {
    pub fn completed(result: StepResult) -> Self {
        Self {
            result,
            fault: None,
        }
    }

    pub fn device_fault(step: u32, err: &AutoGlmError) -> Self {
        let message = device_error_message(err);
        tracing::error!(step, error = %err, "failed to get device info");
        Self {
            result: StepResult::aborted(step, message.clone()),
            fault: Some(StepFault::Device(message)),
        }
    }

    pub fn model_fault(step: u32, err: &AutoGlmError) -> Self {
        let message = match err {
            AutoGlmError::LlmProvider(m) => format!("Model error: {m}"),
            other => format!("Model error: {other}"),
        };
        tracing::error!(step, error = %err, "LLM error");
        Self {
            result: StepResult::aborted(step, message.clone()),
            fault: Some(StepFault::Model(message)),
        }
    }
}

pub fn device_error_message(err: &AutoGlmError) -> String {
    match err {
        AutoGlmError::Device(m) => format!("Device error: {m}"),
        other => format!("Device error: {other}"),
    }
}

/// Everything one step may touch. The context is borrowed mutably for the
/// duration of the step only.
pub struct StepContext<'a> {
    pub step: u32,
    pub context: &'a mut ConversationContext,
    pub device: &'a dyn Device,
    pub executor: &'a dyn ActionExecutor,
    pub provider: &'a dyn LlmProvider,
    pub call_config: &'a CallConfig,
    pub events: &'a EventSink<AgentEvent>,
    pub cancel: &'a CancellationToken,
    /// Observation already embedded in the context by
    /// [`StepStrategy::prepare_initial_context`]; set for the first step only.
    pub initial: Option<Observation>,
}

/// Variant-specific half of the agent loop.
#[async_trait]
pub trait StepStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_system_prompt(&self, lang: &str) -> String;

    /// Append the first user turn (task + first screenshot).
    fn prepare_initial_context(
        &self,
        context: &mut ConversationContext,
        task: &str,
        observation: &Observation,
    );

    /// Run one step, emitting thinking events as they arrive.
    ///
    /// Device and model failures are reported through [`StepOutcome::fault`];
    /// `Err` is reserved for cancellation and a closed event channel.
    async fn execute_step(&self, cx: StepContext<'_>) -> AutoGlmResult<StepOutcome>;
}

/// Race `fut` against the run's cancellation token.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> AutoGlmResult<T>
where
    F: Future<Output = AutoGlmResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AutoGlmError::Cancelled),
        result = fut => result,
    }
}

/// Fresh screenshot, then the foreground app.
pub async fn observe(device: &dyn Device, cancel: &CancellationToken) -> AutoGlmResult<Observation> {
    let screenshot = cancellable(cancel, device.get_screenshot()).await?;
    let current_app = cancellable(cancel, device.get_current_app()).await?;
    Ok(Observation {
        screenshot,
        current_app,
    })
}

/// Run `action` to completion. Executor errors become a failed result that
/// ends the run.
pub async fn dispatch(
    executor: &dyn ActionExecutor,
    action: &Action,
    screenshot: &Screenshot,
) -> ActionResult {
    match executor
        .execute(action, screenshot.width, screenshot.height)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(action = action.label(), error = %e, "action execution error");
            ActionResult {
                success: false,
                should_finish: true,
                message: Some(e.to_string()),
            }
        }
    }
}

/// Executor-level `should_finish` ends the run even for non-finish actions.
pub fn step_result(step: u32, thinking: String, action: Action, result: &ActionResult) -> StepResult {
    let finished = action.is_finish() || result.should_finish;
    let message = result.message.clone().or_else(|| match &action {
        Action::Finish { message } => Some(message.clone()),
        Action::Do(_) => None,
    });
    StepResult {
        step,
        thinking,
        action: Some(action),
        success: result.success,
        finished,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::DeviceAction;
    use crate::device::mock::MockDevice;
    use crate::executor::{CoordinateSpace, DeviceActionHandler};
    use std::sync::Arc;

    #[tokio::test]
    async fn cancelled_token_wins_over_ready_future() {
        let token = CancellationToken::new();
        token.cancel();
        let result = cancellable(&token, async { Ok(1) }).await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn executor_errors_become_finishing_failures() {
        let device = Arc::new(MockDevice::new("m").fail_actions());
        let exec = DeviceActionHandler::new(device.clone(), CoordinateSpace::Relative);
        let shot = device.get_screenshot().await.unwrap();
        let result = dispatch(&exec, &Action::Do(DeviceAction::Back), &shot).await;
        assert!(!result.success);
        assert!(result.should_finish);
    }

    #[test]
    fn executor_should_finish_is_honoured() {
        let result = ActionResult {
            success: true,
            should_finish: true,
            message: None,
        };
        let step = step_result(4, String::new(), Action::Do(DeviceAction::Home), &result);
        assert!(step.finished);
        assert_eq!(step.message, None);

        let step = step_result(5, String::new(), Action::finish("bye"), &ActionResult::ok());
        assert!(step.finished);
        assert_eq!(step.message.as_deref(), Some("bye"));
    }

    #[test]
    fn fault_messages_carry_prefix() {
        let outcome = StepOutcome::device_fault(3, &AutoGlmError::Device("offline".into()));
        assert_eq!(outcome.result.message.as_deref(), Some("Device error: offline"));
        assert!(outcome.result.finished && !outcome.result.success);
        assert_eq!(outcome.fault.unwrap().state(), AgentState::DeviceError);

        let outcome = StepOutcome::model_fault(1, &AutoGlmError::LlmProvider("401".into()));
        assert_eq!(outcome.result.message.as_deref(), Some("Model error: 401"));
    }
}
