use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::context::{assistant_message, system_message, user_message};
use crate::agent_engine::event_bus::EventSink;
use crate::agent_engine::step::cancellable;
use crate::dual_model::protocols::{
    Decision, DecisionAction, DualModelEvent, DualModelPayload, ModelRole, TaskPlan,
};
use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage, StreamChunkKind};
use crate::prompts::DECISION_SYSTEM_PROMPT;

/// Reply shapes the decision model is prompted to produce.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DecisionReply {
    Plan {
        #[serde(default)]
        summary: String,
        #[serde(default)]
        steps: Vec<String>,
        #[serde(default)]
        estimated_actions: u32,
    },
    Decision {
        action: DecisionAction,
        #[serde(default)]
        target: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        finished: bool,
    },
    Finish {
        #[serde(default)]
        message: String,
        #[serde(default = "default_true")]
        success: bool,
    },
}

fn default_true() -> bool {
    true
}

/// JSON object embedded in a reply, with or without a ```json fence.
fn extract_json(text: &str) -> AutoGlmResult<&str> {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&text[start..=end]),
        _ => Err(AutoGlmError::Parse(format!(
            "no JSON object in decision reply: {}",
            text.chars().take(120).collect::<String>()
        ))),
    }
}

fn parse_reply(text: &str) -> AutoGlmResult<DecisionReply> {
    let json = extract_json(text)?;
    serde_json::from_str(json)
        .map_err(|e| AutoGlmError::Parse(format!("invalid decision reply: {e}")))
}

/// The planning half of the dual-model agent. Text only; it learns about the
/// screen from the vision model's descriptions.
pub struct DecisionModel {
    provider: Arc<dyn LlmProvider>,
    call_config: CallConfig,
    history: Vec<ChatMessage>,
}

impl DecisionModel {
    pub fn new(provider: Arc<dyn LlmProvider>, call_config: CallConfig) -> Self {
        Self {
            provider,
            call_config,
            history: vec![system_message(DECISION_SYSTEM_PROMPT)],
        }
    }

    /// Drop everything but the system prompt.
    pub fn reset(&mut self) {
        self.history.truncate(1);
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub async fn analyze_task(
        &mut self,
        task: &str,
        events: &EventSink<DualModelEvent>,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<TaskPlan> {
        self.reset();
        let prompt = format!("任务: {task}\n\n请分析这个任务并制定执行计划。");
        let text = self.ask(prompt, 0, events, cancel).await?;

        let plan = match parse_reply(&text)? {
            DecisionReply::Plan {
                summary,
                steps,
                estimated_actions,
            } => TaskPlan {
                summary,
                steps,
                estimated_actions,
            },
            other => {
                tracing::warn!(reply = ?other, "expected a plan, using the task as summary");
                TaskPlan {
                    summary: task.to_string(),
                    ..TaskPlan::default()
                }
            }
        };
        tracing::info!(
            summary = %plan.summary,
            steps = plan.steps.len(),
            estimated = plan.estimated_actions,
            "task plan ready"
        );
        Ok(plan)
    }

    pub async fn make_decision(
        &mut self,
        screen_description: &str,
        task_context: &str,
        step: u32,
        events: &EventSink<DualModelEvent>,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<Decision> {
        let prompt = format!(
            "屏幕描述:\n{screen_description}\n\n{task_context}\n\n请决定下一步操作。"
        );
        let text = self.ask(prompt, step, events, cancel).await?;

        let decision = match parse_reply(&text)? {
            DecisionReply::Decision {
                action: DecisionAction::Finish,
                reasoning,
                ..
            } => Decision::finish(reasoning, true),
            DecisionReply::Decision {
                action,
                target,
                content,
                reasoning,
                finished,
            } => Decision {
                action,
                target,
                content,
                reasoning,
                finished,
                success: true,
            },
            DecisionReply::Finish { message, success } => Decision::finish(message, success),
            DecisionReply::Plan { .. } => {
                return Err(AutoGlmError::Parse(
                    "decision model returned a plan instead of a decision".into(),
                ))
            }
        };
        tracing::info!(
            step,
            action = decision.action.as_str(),
            element = %decision.target,
            finished = decision.finished,
            "decision made"
        );
        Ok(decision)
    }

    /// Send `prompt`, keep both turns in history and return the reply text.
    async fn ask(
        &mut self,
        prompt: String,
        step: u32,
        events: &EventSink<DualModelEvent>,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<String> {
        self.history.push(user_message(prompt, None));
        let reply = if self.call_config.stream {
            self.stream_reply(step, events, cancel).await
        } else {
            cancellable(
                cancel,
                self.provider.chat(&self.history, &[], &self.call_config),
            )
            .await
            .map(|response| response.content)
        };
        match reply {
            Ok(text) => {
                self.history.push(assistant_message(text.clone(), None));
                Ok(text)
            }
            Err(e) => {
                // no half-answered turns
                self.history.pop();
                Err(e)
            }
        }
    }

    async fn stream_reply(
        &self,
        step: u32,
        events: &EventSink<DualModelEvent>,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<String> {
        let mut stream = cancellable(
            cancel,
            self.provider.stream_chat(&self.history, &self.call_config),
        )
        .await?;
        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AutoGlmError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            match chunk.kind {
                StreamChunkKind::Content => {
                    text.push_str(&chunk.content);
                    events
                        .emit(DualModelEvent::new(
                            DualModelPayload::DecisionThinking {
                                chunk: chunk.content,
                            },
                            Some(ModelRole::Decision),
                            step,
                        ))
                        .await?;
                }
                StreamChunkKind::Error => return Err(AutoGlmError::LlmProvider(chunk.content)),
                StreamChunkKind::Done => break,
                StreamChunkKind::Reasoning | StreamChunkKind::ToolCall => {}
            }
        }
        Ok(text)
    }
}
