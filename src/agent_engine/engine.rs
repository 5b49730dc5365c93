use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::event_bus::EventSink;
use crate::agent_engine::events::AgentEvent;
use crate::agent_engine::glm::GlmStrategy;
use crate::agent_engine::history::StepLog;
use crate::agent_engine::loop_control::{LoopController, LoopDecision};
use crate::agent_engine::state::{AgentState, RunOutcome, RunState};
use crate::agent_engine::step::{device_error_message, observe, StepContext, StepStrategy};
use crate::agent_engine::tool_call::ToolCallStrategy;
use crate::config::{AgentKindConfig, AgentSection, AppConfig};
use crate::device::Device;
use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::executor::{ActionExecutor, DeviceActionHandler};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ProviderRegistry;
use crate::llm::types::{CallConfig, ChatMessage};

const CANCELLED_MESSAGE: &str = "Task cancelled by user";
const MAX_STEPS_MESSAGE: &str = "Max steps reached";
const DEFAULT_DONE_MESSAGE: &str = "Task completed";

/// Which step strategy drives the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Glm,
    ToolCall,
}

impl AgentKind {
    pub fn strategy(self) -> AutoGlmResult<Box<dyn StepStrategy>> {
        Ok(match self {
            AgentKind::Glm => Box::new(GlmStrategy),
            AgentKind::ToolCall => Box::new(ToolCallStrategy::new()?),
        })
    }
}

impl From<AgentKindConfig> for AgentKind {
    fn from(kind: AgentKindConfig) -> Self {
        match kind {
            AgentKindConfig::Glm => AgentKind::Glm,
            AgentKindConfig::ToolCall => AgentKind::ToolCall,
        }
    }
}

/// Cooperative stop switch for a [`PhoneAgent`], cloneable across tasks.
///
/// Each run arms a fresh token, so cancelling while idle has no effect on
/// the next run.
#[derive(Clone, Default)]
pub struct CancelHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        tracing::info!("agent cancel requested");
        self.lock().cancel();
    }

    pub(crate) fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.lock() = token.clone();
        token
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Single-model phone agent: observe → decide → act until the model
/// finishes, the step budget runs out or the run is cancelled.
pub struct PhoneAgent {
    strategy: Box<dyn StepStrategy>,
    provider: Arc<dyn LlmProvider>,
    call_config: CallConfig,
    device: Arc<dyn Device>,
    executor: Arc<dyn ActionExecutor>,
    loop_ctrl: LoopController,
    run: RunState,
    step_log: StepLog,
    cancel: CancelHandle,
}

impl PhoneAgent {
    pub fn new(
        strategy: Box<dyn StepStrategy>,
        provider: Arc<dyn LlmProvider>,
        call_config: CallConfig,
        device: Arc<dyn Device>,
        settings: &AgentSection,
    ) -> Self {
        let system_prompt = settings
            .system_prompt
            .clone()
            .unwrap_or_else(|| strategy.default_system_prompt(&settings.lang));
        let executor: Arc<dyn ActionExecutor> = Arc::new(DeviceActionHandler::new(
            device.clone(),
            settings.coordinates.into(),
        ));
        tracing::info!(
            strategy = strategy.name(),
            device = device.device_id(),
            max_steps = settings.max_steps,
            "phone agent created"
        );
        Self {
            strategy,
            provider,
            call_config,
            device,
            executor,
            loop_ctrl: LoopController::new(settings.max_steps),
            run: RunState::new(system_prompt),
            step_log: StepLog::default(),
            cancel: CancelHandle::default(),
        }
    }

    /// Agent for the `agent` role of the loaded config.
    pub fn from_config(
        config: &AppConfig,
        registry: &ProviderRegistry,
        device: Arc<dyn Device>,
    ) -> AutoGlmResult<Self> {
        let strategy = AgentKind::from(config.agent.kind).strategy()?;
        let (provider, call_config) = registry.call_config_for_role("agent")?;
        Ok(Self::new(strategy, provider, call_config, device, &config.agent))
    }

    /// Replace the default device-backed executor.
    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stop the current run before its next step or model chunk. No-op when idle.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drop the conversation and step count. The only point where context is
    /// truncated; consecutive runs continue the same conversation.
    pub fn reset(&mut self) -> AutoGlmResult<()> {
        if self.run.status.is_running() {
            return Err(AutoGlmError::Agent("cannot reset while running".into()));
        }
        self.run.reset();
        self.step_log.clear();
        Ok(())
    }

    pub fn step_count(&self) -> u32 {
        self.run.step_count
    }

    pub fn is_running(&self) -> bool {
        self.run.status.is_running()
    }

    pub fn state(&self) -> AgentState {
        self.run.status.state()
    }

    /// Copy of the conversation so far.
    pub fn context(&self) -> Vec<ChatMessage> {
        self.run.context.snapshot()
    }

    pub fn step_log(&self) -> &StepLog {
        &self.step_log
    }

    /// Run `task`, sending every event to `tx`.
    ///
    /// The task is appended to the existing conversation, and the step
    /// budget is shared until [`PhoneAgent::reset`]. Returns `Err(Cancelled)`
    /// after emitting a `cancelled` event when the run is stopped, including
    /// when the receiver is dropped. Dropping the returned future leaves the
    /// agent idle in state `Aborted`.
    pub async fn stream(
        &mut self,
        task: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> AutoGlmResult<RunOutcome> {
        let events = EventSink::new(tx);
        let cancel = self.cancel.arm();
        let guard = self.run.status.begin();
        tracing::info!(
            task = %task,
            strategy = self.strategy.name(),
            prior_steps = self.run.step_count,
            "run started"
        );

        let result = self.drive(task, &events, &cancel).await;

        match result {
            Ok(outcome) => {
                guard.finish(outcome.state);
                tracing::info!(
                    state = ?outcome.state,
                    steps = outcome.steps,
                    success = outcome.success,
                    "run finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                guard.finish(AgentState::Aborted);
                if e.is_cancelled() {
                    tracing::info!(steps = self.run.step_count, "run cancelled");
                    // the receiver may already be gone
                    let _ = events
                        .emit(AgentEvent::Cancelled {
                            message: CANCELLED_MESSAGE.to_string(),
                        })
                        .await;
                } else {
                    tracing::error!(error = %e, "run aborted");
                }
                Err(e)
            }
        }
    }

    /// Run `task` to the end and return the final `done` message.
    pub async fn run(&mut self, task: &str) -> AutoGlmResult<String> {
        let (tx, mut rx) = mpsc::channel(64);
        let drain = async move {
            let mut last = String::new();
            while let Some(event) = rx.recv().await {
                if let AgentEvent::Done { message, .. } = event {
                    last = message;
                }
            }
            last
        };
        let (outcome, message) = tokio::join!(self.stream(task, tx), drain);
        outcome?;
        Ok(message)
    }

    async fn drive(
        &mut self,
        task: &str,
        events: &EventSink<AgentEvent>,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<RunOutcome> {
        let initial = match observe(self.device.as_ref(), cancel).await {
            Ok(obs) => obs,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                let message = device_error_message(&e);
                tracing::error!(error = %e, "failed to get device info");
                events.emit(AgentEvent::Error { message: message.clone() }).await?;
                return self
                    .finish(events, AgentState::DeviceError, false, message)
                    .await;
            }
        };
        // an interrupted earlier run may have left its screenshot behind
        self.run.context.strip_images();
        self.strategy
            .prepare_initial_context(&mut self.run.context, task, &initial);
        let mut initial = Some(initial);

        loop {
            match self.loop_ctrl.check(self.run.step_count, cancel) {
                LoopDecision::Continue => {}
                LoopDecision::Cancelled => return Err(AutoGlmError::Cancelled),
                LoopDecision::MaxStepsReached => {
                    tracing::warn!(max_steps = self.loop_ctrl.max_steps(), "max steps reached");
                    return self
                        .finish(
                            events,
                            AgentState::MaxStepsReached,
                            false,
                            MAX_STEPS_MESSAGE.to_string(),
                        )
                        .await;
                }
            }

            self.run.step_count += 1;
            let step = self.run.step_count;
            tracing::info!(step, max_steps = self.loop_ctrl.max_steps(), "step started");

            let cx = StepContext {
                step,
                context: &mut self.run.context,
                device: self.device.as_ref(),
                executor: self.executor.as_ref(),
                provider: self.provider.as_ref(),
                call_config: &self.call_config,
                events,
                cancel,
                initial: initial.take(),
            };
            let outcome = self.strategy.execute_step(cx).await?;

            if let Some(fault) = &outcome.fault {
                events
                    .emit(AgentEvent::Error {
                        message: fault.message().to_string(),
                    })
                    .await?;
            }
            let result = outcome.result;
            self.step_log.push(result.clone());
            events.emit(AgentEvent::Step(result.clone())).await?;

            if result.finished {
                let state = outcome
                    .fault
                    .as_ref()
                    .map_or(AgentState::Finished, |f| f.state());
                let message = result
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_DONE_MESSAGE.to_string());
                return self.finish(events, state, result.success, message).await;
            }
        }
    }

    async fn finish(
        &self,
        events: &EventSink<AgentEvent>,
        state: AgentState,
        success: bool,
        message: String,
    ) -> AutoGlmResult<RunOutcome> {
        let steps = self.run.step_count;
        events
            .emit(AgentEvent::Done {
                message: message.clone(),
                steps,
                success,
            })
            .await?;
        Ok(RunOutcome {
            state,
            success,
            message,
            steps,
        })
    }
}
