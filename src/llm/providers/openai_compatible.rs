use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;

use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::llm::provider::{ChunkStream, LlmProvider};
use crate::llm::sse_parser::{self, SseLineBuffer};
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunk, StreamChunkKind, ToolCall,
    ToolDef,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiCompatibleProvider {
    id: String,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            id,
            endpoint: chat_endpoint(&api_base),
            api_key,
            client,
        }
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        cfg: &CallConfig,
        stream: bool,
    ) -> AutoGlmResult<serde_json::Value> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": messages,
            "stream": stream,
            "temperature": cfg.temperature,
        });
        if let Some(max_tokens) = cfg.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some(top_p) = cfg.top_p {
            body["top_p"] = top_p.into();
        }
        if let Some(penalty) = cfg.frequency_penalty {
            body["frequency_penalty"] = penalty.into();
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
            body["tool_choice"] =
                serde_json::json!(cfg.tool_choice.as_deref().unwrap_or("auto"));
        }
        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream,
            body = %sanitized_for_log(&body),
            "sending LLM request"
        );
        Ok(body)
    }

    async fn send(&self, body: &serde_json::Value) -> AutoGlmResult<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(AutoGlmError::LlmProvider(format!("{status}: {err_body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        cfg: &CallConfig,
    ) -> AutoGlmResult<LlmResponse> {
        let body = self.request_body(messages, tools, cfg, false)?;
        let response = self.send(&body).await?;
        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cfg: &CallConfig,
    ) -> AutoGlmResult<ChunkStream> {
        let body = self.request_body(messages, &[], cfg, true)?;
        let response = self.send(&body).await?;
        let bytes = response.bytes_stream().map(|r| r.map(|b| b.to_vec()));
        Ok(sse_chunks(bytes.boxed()))
    }
}

type ByteStream = BoxStream<'static, reqwest::Result<Vec<u8>>>;

struct SseState {
    bytes: ByteStream,
    lines: SseLineBuffer,
    pending: VecDeque<StreamChunk>,
    finished: bool,
}

/// Turn an SSE byte stream into parsed chunks, ending after the first `Done`.
fn sse_chunks(bytes: ByteStream) -> ChunkStream {
    let state = SseState {
        bytes,
        lines: SseLineBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.pending.pop_front() {
                if chunk.kind == StreamChunkKind::Done {
                    st.finished = true;
                    st.pending.clear();
                }
                return Some((Ok(chunk), st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(bytes)) => {
                    for line in st.lines.push(&bytes) {
                        queue_line(&line, &mut st.pending);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(AutoGlmError::Http(e)), st));
                }
                None => {
                    if let Some(line) = st.lines.finish() {
                        queue_line(&line, &mut st.pending);
                    }
                    // Stream ended without a [DONE] marker.
                    st.pending.push_back(StreamChunk::done());
                }
            }
        }
    })
    .boxed()
}

fn queue_line(line: &str, pending: &mut VecDeque<StreamChunk>) {
    match sse_parser::parse_sse_line(line) {
        Ok(Some(chunk)) => pending.push_back(chunk),
        Ok(None) => {}
        Err(e) => tracing::debug!("SSE parse skipped: {e}"),
    }
}

/// Extract text and tool calls from a non-streaming completion body.
fn parse_completion(json: &serde_json::Value) -> AutoGlmResult<LlmResponse> {
    let Some(message) = json["choices"].get(0).map(|c| &c["message"]) else {
        return Err(AutoGlmError::LlmProvider(format!(
            "response has no choices: {json}"
        )));
    };

    let content = message["content"].as_str().unwrap_or("").to_string();
    let reasoning = message["reasoning_content"]
        .as_str()
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: match &tc["function"]["arguments"] {
                            serde_json::Value::String(s) => s.clone(),
                            serde_json::Value::Null => "{}".to_string(),
                            other => other.to_string(),
                        },
                    },
                })
                .filter(|tc| !tc.function.name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    tracing::info!(
        content_len = content.len(),
        tool_calls = tool_calls.len(),
        tools = ?tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
        "LLM JSON response received"
    );

    Ok(LlmResponse {
        content,
        reasoning,
        tool_calls,
    })
}

/// Accepts either a base URL (`…/v1`) or a full `…/chat/completions` endpoint.
fn chat_endpoint(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

/// Copy of the request body with base64 image payloads replaced.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    part["image_url"]["url"] =
                        serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalised() {
        assert_eq!(
            chat_endpoint("https://open.bigmodel.cn/api/paas/v4/"),
            "https://open.bigmodel.cn/api/paas/v4/chat/completions"
        );
        assert_eq!(
            chat_endpoint("http://localhost:8000/v1/chat/completions"),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn completion_with_tool_call() {
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "tapping the icon",
                    "tool_calls": [{
                        "id": "abc",
                        "type": "function",
                        "function": {"name": "tap", "arguments": "{\"x\":500,\"y\":300}"}
                    }]
                }
            }]
        });
        let resp = parse_completion(&json).unwrap();
        assert_eq!(resp.content, "tapping the icon");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.name, "tap");
        assert_eq!(resp.tool_calls[0].function.arguments, "{\"x\":500,\"y\":300}");
    }

    #[test]
    fn completion_without_choices_is_an_error() {
        let json = serde_json::json!({"error": {"message": "bad key"}});
        assert!(parse_completion(&json).is_err());
    }

    #[test]
    fn log_body_hides_images() {
        let body = serde_json::json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                    {"type": "text", "text": "hi"}
                ]
            }]
        });
        let logged = sanitized_for_log(&body);
        assert!(!logged.contains("AAAA"));
        assert!(logged.contains("<omitted_base64_image>"));
    }

    #[tokio::test]
    async fn sse_stream_stops_at_done() {
        let parts: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n".to_vec()),
        ];
        let chunks: Vec<_> = sse_chunks(stream::iter(parts).boxed()).collect().await;
        let kinds: Vec<_> = chunks
            .iter()
            .map(|c| c.as_ref().map(|c| c.kind).unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec![
                StreamChunkKind::Content,
                StreamChunkKind::Content,
                StreamChunkKind::Done
            ]
        );
    }
}
