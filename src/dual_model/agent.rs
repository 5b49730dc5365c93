use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::engine::CancelHandle;
use crate::agent_engine::event_bus::EventSink;
use crate::agent_engine::loop_control::{LoopController, LoopDecision};
use crate::agent_engine::state::{AgentState, RunOutcome};
use crate::config::{AppConfig, DualModelSection};
use crate::device::Device;
use crate::dual_model::decision::DecisionModel;
use crate::dual_model::protocols::{
    DecisionAction, DualModelEvent, DualModelPayload, DualModelState, ModelRole, ModelStage,
};
use crate::dual_model::vision::VisionModel;
use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::llm::registry::ProviderRegistry;

const ABORTED_MESSAGE: &str = "任务被用户中断";
const DEFAULT_FINISH_MESSAGE: &str = "任务完成";

/// Read-only view of a [`DualModelAgent`]'s live state, usable while it runs.
#[derive(Clone, Default)]
pub struct StateHandle {
    inner: Arc<Mutex<DualModelState>>,
}

impl StateHandle {
    pub fn snapshot(&self) -> DualModelState {
        self.lock().clone()
    }

    fn update(&self, f: impl FnOnce(&mut DualModelState)) {
        f(&mut *self.lock());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DualModelState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct StepReport {
    finished: bool,
    success: bool,
    message: String,
}

/// Two-model agent: a text model plans and decides, a vision model reads the
/// screen and executes.
pub struct DualModelAgent {
    decision: DecisionModel,
    vision: VisionModel,
    loop_ctrl: LoopController,
    step_delay: Duration,
    step_count: u32,
    state: StateHandle,
    cancel: CancelHandle,
}

impl DualModelAgent {
    pub fn new(decision: DecisionModel, vision: VisionModel, settings: &DualModelSection) -> Self {
        tracing::info!(
            max_steps = settings.max_steps,
            step_delay_ms = settings.step_delay_ms,
            "dual-model agent created"
        );
        Self {
            decision,
            vision,
            loop_ctrl: LoopController::new(settings.max_steps),
            step_delay: Duration::from_millis(settings.step_delay_ms),
            step_count: 0,
            state: StateHandle::default(),
            cancel: CancelHandle::default(),
        }
    }

    /// Agent for the `decision` and `vision` roles of the loaded config.
    pub fn from_config(
        config: &AppConfig,
        registry: &ProviderRegistry,
        device: Arc<dyn Device>,
    ) -> AutoGlmResult<Self> {
        let (decision_provider, decision_cfg) = registry.call_config_for_role("decision")?;
        let (vision_provider, vision_cfg) = registry.call_config_for_role("vision")?;
        Ok(Self::new(
            DecisionModel::new(decision_provider, decision_cfg),
            VisionModel::new(vision_provider, vision_cfg, device),
            &config.dual_model,
        ))
    }

    /// Stop before the next step or model call. No-op when idle.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn reset(&mut self) {
        self.step_count = 0;
        self.decision.reset();
        self.state.update(|s| *s = DualModelState::default());
        tracing::info!("dual-model agent reset");
    }

    pub fn state(&self) -> DualModelState {
        self.state.snapshot()
    }

    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    /// Run `task`, sending every event to `tx`. An abort ends the run with
    /// an `aborted` event and an unsuccessful outcome rather than an error.
    pub async fn run(
        &mut self,
        task: &str,
        tx: mpsc::Sender<DualModelEvent>,
    ) -> AutoGlmResult<RunOutcome> {
        let events = EventSink::new(tx);
        let cancel = self.cancel.arm();
        self.reset();
        tracing::info!(task = %task, "dual-model run started");

        match self.drive(task, &events, &cancel).await {
            Err(e) if e.is_cancelled() => {
                tracing::info!(steps = self.step_count, "dual-model run aborted");
                self.state.update(|s| {
                    s.decision.active = false;
                    s.vision.active = false;
                });
                let _ = self
                    .emit(
                        &events,
                        DualModelPayload::Aborted {
                            message: ABORTED_MESSAGE.to_string(),
                        },
                        None,
                    )
                    .await;
                Ok(RunOutcome {
                    state: AgentState::Aborted,
                    success: false,
                    message: ABORTED_MESSAGE.to_string(),
                    steps: self.step_count,
                })
            }
            other => other,
        }
    }

    async fn drive(
        &mut self,
        task: &str,
        events: &EventSink<DualModelEvent>,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<RunOutcome> {
        self.stage(ModelRole::Decision, ModelStage::Analyzing);
        self.emit(
            events,
            DualModelPayload::DecisionStart {
                stage: ModelStage::Analyzing,
                task: Some(task.to_string()),
            },
            Some(ModelRole::Decision),
        )
        .await?;

        let plan = match self.decision.analyze_task(task, events, cancel).await {
            Ok(plan) => plan,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::error!(error = %e, "task analysis failed");
                self.emit(events, DualModelPayload::Error { message: e.to_string() }, None)
                    .await?;
                return Ok(RunOutcome {
                    state: AgentState::ModelError,
                    success: false,
                    message: format!("执行异常: {e}"),
                    steps: 0,
                });
            }
        };
        self.state.update(|s| {
            s.decision.stage = ModelStage::Idle;
            s.progress.task_plan = plan.steps.clone();
            s.progress.total_steps = plan.estimated_actions;
        });
        self.emit(
            events,
            DualModelPayload::TaskPlan { plan },
            Some(ModelRole::Decision),
        )
        .await?;

        let finish = loop {
            match self.loop_ctrl.check(self.step_count, cancel) {
                LoopDecision::Continue => {}
                LoopDecision::Cancelled => return Err(AutoGlmError::Cancelled),
                LoopDecision::MaxStepsReached => break None,
            }
            if self.step_count > 0 {
                self.pause(cancel).await?;
            }

            self.step_count += 1;
            tracing::info!(
                step = self.step_count,
                max_steps = self.loop_ctrl.max_steps(),
                "dual-model step started"
            );
            match self.execute_step(events, cancel).await {
                Ok(report) if report.finished => break Some(report),
                Ok(_) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::error!(step = self.step_count, error = %e, "step failed");
                    self.emit(
                        events,
                        DualModelPayload::StepFailed {
                            message: e.to_string(),
                        },
                        None,
                    )
                    .await?;
                }
            }
        };

        let (state, success, message) = match finish {
            Some(report) => {
                let message = if report.message.is_empty() {
                    DEFAULT_FINISH_MESSAGE.to_string()
                } else {
                    report.message
                };
                (AgentState::Finished, report.success, message)
            }
            None => (
                AgentState::MaxStepsReached,
                false,
                format!("达到最大步数限制({})", self.loop_ctrl.max_steps()),
            ),
        };
        self.emit(
            events,
            DualModelPayload::TaskComplete {
                success,
                message: message.clone(),
                steps: self.step_count,
            },
            None,
        )
        .await?;
        tracing::info!(success, steps = self.step_count, "dual-model run finished");
        Ok(RunOutcome {
            state,
            success,
            message,
            steps: self.step_count,
        })
    }

    async fn execute_step(
        &mut self,
        events: &EventSink<DualModelEvent>,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<StepReport> {
        // perceive
        self.stage(ModelRole::Vision, ModelStage::Recognizing);
        self.emit(
            events,
            DualModelPayload::VisionStart {
                stage: ModelStage::Recognizing,
            },
            Some(ModelRole::Vision),
        )
        .await?;
        let observation = self.vision.capture(cancel).await?;
        let screen = self.vision.describe(&observation, cancel).await?;
        self.state.update(|s| {
            s.vision.description = screen.description.chars().take(200).collect();
            s.vision.stage = ModelStage::Idle;
        });
        self.emit(
            events,
            DualModelPayload::VisionRecognition(screen.clone()),
            Some(ModelRole::Vision),
        )
        .await?;

        // decide
        self.stage(ModelRole::Decision, ModelStage::Deciding);
        self.emit(
            events,
            DualModelPayload::DecisionStart {
                stage: ModelStage::Deciding,
                task: None,
            },
            Some(ModelRole::Decision),
        )
        .await?;
        let task_context = format!("当前应用: {}", screen.current_app);
        let decision = self
            .decision
            .make_decision(
                &screen.description,
                &task_context,
                self.step_count,
                events,
                cancel,
            )
            .await?;
        self.state.update(|s| {
            s.decision.result = format!("{}: {}", decision.action.as_str(), decision.target);
            s.decision.thinking = decision.reasoning.clone();
            s.decision.stage = ModelStage::Idle;
        });
        self.emit(
            events,
            DualModelPayload::DecisionResult {
                reasoning: decision.reasoning.clone(),
                decision: decision.clone(),
            },
            Some(ModelRole::Decision),
        )
        .await?;

        if decision.finished {
            self.state.update(|s| s.decision.active = false);
            self.emit(
                events,
                DualModelPayload::StepComplete {
                    success: decision.success,
                    finished: true,
                },
                None,
            )
            .await?;
            return Ok(StepReport {
                finished: true,
                success: decision.success,
                message: decision.reasoning,
            });
        }

        if decision.action == DecisionAction::Type && !decision.content.is_empty() {
            self.stage(ModelRole::Decision, ModelStage::Generating);
            self.emit(
                events,
                DualModelPayload::ContentGeneration {
                    content: decision.content.clone(),
                    purpose: decision.target.clone(),
                },
                Some(ModelRole::Decision),
            )
            .await?;
            self.state.update(|s| s.decision.stage = ModelStage::Idle);
        }

        // act
        self.stage(ModelRole::Vision, ModelStage::Executing);
        let request = decision.request();
        self.emit(
            events,
            DualModelPayload::ActionStart {
                action: request.clone(),
            },
            Some(ModelRole::Vision),
        )
        .await?;
        let execution = self
            .vision
            .execute(&request, &observation.screenshot, cancel)
            .await?;
        self.state.update(|s| {
            s.vision.action = format!("{}: {}", execution.action_type, execution.target);
            s.vision.stage = ModelStage::Idle;
            s.vision.active = false;
        });
        self.emit(
            events,
            DualModelPayload::ActionResult(execution.clone()),
            Some(ModelRole::Vision),
        )
        .await?;
        self.emit(
            events,
            DualModelPayload::StepComplete {
                success: execution.success,
                finished: execution.finished,
            },
            None,
        )
        .await?;

        Ok(StepReport {
            finished: execution.finished,
            success: execution.success,
            message: decision.reasoning,
        })
    }

    /// Inter-step pacing; an abort cuts it short.
    async fn pause(&self, cancel: &CancellationToken) -> AutoGlmResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AutoGlmError::Cancelled),
            _ = tokio::time::sleep(self.step_delay) => Ok(()),
        }
    }

    /// Mark `role` as the active model at `stage`.
    fn stage(&self, role: ModelRole, stage: ModelStage) {
        let step = self.step_count;
        self.state.update(|s| {
            let decision_turn = role == ModelRole::Decision;
            s.decision.active = decision_turn;
            s.vision.active = !decision_turn;
            if decision_turn {
                s.decision.stage = stage;
            } else {
                s.vision.stage = stage;
            }
            s.progress.current_step = step;
        });
    }

    async fn emit(
        &self,
        events: &EventSink<DualModelEvent>,
        payload: DualModelPayload,
        model: Option<ModelRole>,
    ) -> AutoGlmResult<()> {
        events
            .emit(DualModelEvent::new(payload, model, self.step_count))
            .await
    }
}
