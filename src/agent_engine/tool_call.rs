use async_trait::async_trait;
use serde_json::Value;

use crate::actions::tool_call_to_action;
use crate::agent_engine::context::{assistant_message, tool_message, user_message, ConversationContext};
use crate::agent_engine::events::AgentEvent;
use crate::agent_engine::step::{
    cancellable, dispatch, observe, step_result, Observation, StepContext, StepOutcome,
    StepStrategy,
};
use crate::errors::AutoGlmResult;
use crate::llm::tools::load_device_tools;
use crate::llm::types::{CallConfig, FunctionCall, LlmResponse, ToolCall, ToolDef};
use crate::prompts;

/// Function-calling agent: one non-streaming completion per step with the
/// device tools offered and a tool call required.
pub struct ToolCallStrategy {
    tools: Vec<ToolDef>,
}

impl ToolCallStrategy {
    pub fn new() -> AutoGlmResult<Self> {
        Ok(Self {
            tools: load_device_tools()?,
        })
    }
}

/// The first tool call of a reply, or an implied `finish`.
fn interpret(response: LlmResponse) -> (String, String, Value) {
    let thinking = response.content;
    match response.tool_calls.into_iter().next() {
        Some(call) => {
            let args = serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
                tracing::warn!(
                    tool = %call.function.name,
                    raw = %call.function.arguments,
                    error = %e,
                    "failed to parse tool arguments"
                );
                Value::Object(Default::default())
            });
            (thinking, call.function.name, args)
        }
        None => {
            tracing::warn!("model did not return a tool call, treating as finish");
            let message = if thinking.is_empty() {
                "No action returned".to_string()
            } else {
                thinking.clone()
            };
            (thinking, "finish".to_string(), serde_json::json!({ "message": message }))
        }
    }
}

#[async_trait]
impl StepStrategy for ToolCallStrategy {
    fn name(&self) -> &'static str {
        "tool_call"
    }

    fn default_system_prompt(&self, lang: &str) -> String {
        prompts::tool_call_system_prompt(lang)
    }

    fn prepare_initial_context(
        &self,
        context: &mut ConversationContext,
        task: &str,
        observation: &Observation,
    ) {
        let text = format!("{task}\n\nCurrent app: {}", observation.current_app);
        context.push(user_message(text, Some(&observation.screenshot)));
    }

    async fn execute_step(&self, mut cx: StepContext<'_>) -> AutoGlmResult<StepOutcome> {
        let observation = match cx.initial.take() {
            Some(initial) => initial,
            None => match observe(cx.device, cx.cancel).await {
                Ok(obs) => {
                    let text = format!("Current app: {}", obs.current_app);
                    cx.context.push(user_message(text, Some(&obs.screenshot)));
                    obs
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => return Ok(StepOutcome::device_fault(cx.step, &e)),
            },
        };

        let cfg = CallConfig {
            stream: false,
            tool_choice: Some("required".to_string()),
            ..cx.call_config.clone()
        };
        let response = match cancellable(
            cx.cancel,
            cx.provider.chat(cx.context.messages(), &self.tools, &cfg),
        )
        .await
        {
            Ok(response) => response,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => return Ok(StepOutcome::model_fault(cx.step, &e)),
        };

        let (thinking, name, args) = interpret(response);
        if !thinking.is_empty() {
            cx.events
                .emit(AgentEvent::Thinking {
                    chunk: thinking.clone(),
                })
                .await?;
        }

        let action = tool_call_to_action(&name, &args);
        tracing::info!(step = cx.step, tool = %name, action = action.label(), "tool call mapped");

        let result = dispatch(cx.executor, &action, &observation.screenshot).await;

        cx.context.strip_images();
        let call_id = format!("call_{}", cx.step);
        cx.context.push(assistant_message(
            thinking.clone(),
            Some(vec![ToolCall {
                id: call_id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name,
                    arguments: args.to_string(),
                },
            }]),
        ));
        cx.context.push(tool_message(call_id, result.to_tool_content()));

        Ok(StepOutcome::completed(step_result(
            cx.step, thinking, action, &result,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str, call: Option<(&str, &str)>) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            reasoning: String::new(),
            tool_calls: call
                .map(|(name, args)| {
                    vec![ToolCall {
                        id: "x".into(),
                        call_type: "function".into(),
                        function: FunctionCall {
                            name: name.into(),
                            arguments: args.into(),
                        },
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn bad_arguments_become_empty_object() {
        let (_, name, args) = interpret(response("", Some(("tap", "{not json"))));
        assert_eq!(name, "tap");
        assert_eq!(args, serde_json::json!({}));
    }

    #[test]
    fn missing_tool_call_is_finish_with_text() {
        let (_, name, args) = interpret(response("all done", None));
        assert_eq!(name, "finish");
        assert_eq!(args["message"], "all done");

        let (_, _, args) = interpret(response("", None));
        assert_eq!(args["message"], "No action returned");
    }
}
