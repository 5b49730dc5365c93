use async_trait::async_trait;
use futures_util::StreamExt;

use crate::actions::{parse_or_finish, split_response, ThinkingSplitter};
use crate::agent_engine::context::{assistant_message, screen_info, user_message, ConversationContext};
use crate::agent_engine::events::AgentEvent;
use crate::agent_engine::step::{
    cancellable, dispatch, observe, step_result, Observation, StepContext, StepOutcome,
    StepStrategy,
};
use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::llm::types::StreamChunkKind;
use crate::prompts;

/// Free-text agent: streams the reply, shows thinking as it arrives and
/// parses a `do(...)`/`finish(...)` action from the full text.
#[derive(Debug, Default)]
pub struct GlmStrategy;

#[async_trait]
impl StepStrategy for GlmStrategy {
    fn name(&self) -> &'static str {
        "glm"
    }

    fn default_system_prompt(&self, lang: &str) -> String {
        prompts::glm_system_prompt(lang)
    }

    fn prepare_initial_context(
        &self,
        context: &mut ConversationContext,
        task: &str,
        observation: &Observation,
    ) {
        let text = format!(
            "{task}\n\n** Screen Info **\n\n{}",
            screen_info(&observation.current_app)
        );
        context.push(user_message(text, Some(&observation.screenshot)));
    }

    async fn execute_step(&self, mut cx: StepContext<'_>) -> AutoGlmResult<StepOutcome> {
        let observation = match cx.initial.take() {
            Some(initial) => initial,
            None => match observe(cx.device, cx.cancel).await {
                Ok(obs) => {
                    let text = format!("** Screen Info **\n\n{}", screen_info(&obs.current_app));
                    cx.context.push(user_message(text, Some(&obs.screenshot)));
                    obs
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => return Ok(StepOutcome::device_fault(cx.step, &e)),
            },
        };

        let raw = match stream_reply(&cx).await {
            Ok(raw) => raw,
            Err(e) if e.is_cancelled() => {
                tracing::info!(step = cx.step, "step cancelled during LLM call");
                return Err(e);
            }
            Err(e) => return Ok(StepOutcome::model_fault(cx.step, &e)),
        };

        let (thinking, action_text) = split_response(&raw);
        let action = parse_or_finish(&action_text);
        tracing::info!(step = cx.step, action = action.label(), "GLM action parsed");

        let result = dispatch(cx.executor, &action, &observation.screenshot).await;

        cx.context.strip_images();
        cx.context.push(assistant_message(
            format!("<think>{thinking}</think><answer>{action_text}</answer>"),
            None,
        ));

        Ok(StepOutcome::completed(step_result(
            cx.step, thinking, action, &result,
        )))
    }
}

/// Stream the model reply, forwarding thinking chunks, and return the raw text.
/// Cancellation drops the stream, which closes the upstream connection.
async fn stream_reply(cx: &StepContext<'_>) -> AutoGlmResult<String> {
    let mut stream = cancellable(
        cx.cancel,
        cx.provider.stream_chat(cx.context.messages(), cx.call_config),
    )
    .await?;

    let mut splitter = ThinkingSplitter::new();
    let mut raw = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cx.cancel.cancelled() => None,
            next = stream.next() => Some(next),
        };
        let Some(next) = next else {
            drop(stream);
            return Err(AutoGlmError::Cancelled);
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;
        match chunk.kind {
            StreamChunkKind::Content => {
                raw.push_str(&chunk.content);
                if let Some(thinking) = splitter.push(&chunk.content) {
                    cx.events
                        .emit(AgentEvent::Thinking { chunk: thinking })
                        .await?;
                }
            }
            StreamChunkKind::Error => return Err(AutoGlmError::LlmProvider(chunk.content)),
            StreamChunkKind::Done => break,
            StreamChunkKind::Reasoning | StreamChunkKind::ToolCall => {}
        }
    }
    tracing::debug!(step = cx.step, len = raw.len(), "model stream complete");
    Ok(raw)
}
