use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::llm::provider::{ChunkStream, LlmProvider};
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunk, ToolCall, ToolDef,
};

/// One canned model reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Plain text; streamed in `chunk_chars`-sized pieces by `stream_chat`.
    Text(String),
    /// A single function call with optional accompanying text.
    ToolCall {
        content: String,
        name: String,
        arguments: String,
    },
    /// The call fails with an `LlmProvider` error.
    Fail(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    pub fn tool(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        ScriptedReply::ToolCall {
            content: String::new(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }
}

#[derive(Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    last: Option<ScriptedReply>,
    requests: Vec<Vec<ChatMessage>>,
}

/// Deterministic in-memory provider replaying a fixed list of replies.
///
/// Every request's message list is recorded so callers can inspect exactly
/// what context the model was shown.
pub struct ScriptedProvider {
    id: String,
    chunk_chars: usize,
    repeat_last: bool,
    script: Mutex<Script>,
    delivered_chunks: Arc<AtomicUsize>,
    closed_streams: Arc<AtomicUsize>,
}

/// Bumps the shared counter when the stream holding it is dropped.
struct CloseCounter(Arc<AtomicUsize>);

impl Drop for CloseCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedProvider {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            id: "scripted".to_string(),
            chunk_chars: 4,
            repeat_last: false,
            script: Mutex::new(Script {
                replies: replies.into_iter().collect(),
                ..Script::default()
            }),
            delivered_chunks: Arc::new(AtomicUsize::new(0)),
            closed_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Keep answering with the final reply once the script runs out.
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.lock().requests.clone()
    }

    /// Stream chunks handed to callers so far, across all streams.
    pub fn delivered_chunks(&self) -> usize {
        self.delivered_chunks.load(Ordering::SeqCst)
    }

    /// Streams the caller has dropped, whether or not they were read to the end.
    pub fn closed_streams(&self) -> usize {
        self.closed_streams.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, messages: &[ChatMessage]) -> AutoGlmResult<ScriptedReply> {
        let mut script = self.lock();
        script.requests.push(messages.to_vec());
        let reply = match script.replies.pop_front() {
            Some(reply) => {
                script.last = Some(reply.clone());
                reply
            }
            None if self.repeat_last => script
                .last
                .clone()
                .ok_or_else(|| AutoGlmError::LlmProvider("script is empty".into()))?,
            None => return Err(AutoGlmError::LlmProvider("script exhausted".into())),
        };
        match reply {
            ScriptedReply::Fail(message) => Err(AutoGlmError::LlmProvider(message)),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDef],
        _cfg: &CallConfig,
    ) -> AutoGlmResult<LlmResponse> {
        let call_index = self.request_count() + 1;
        match self.next_reply(messages)? {
            ScriptedReply::Text(content) => Ok(LlmResponse {
                content,
                ..LlmResponse::default()
            }),
            ScriptedReply::ToolCall {
                content,
                name,
                arguments,
            } => Ok(LlmResponse {
                content,
                reasoning: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("scripted_{call_index}"),
                    call_type: "function".to_string(),
                    function: FunctionCall { name, arguments },
                }],
            }),
            ScriptedReply::Fail(message) => Err(AutoGlmError::LlmProvider(message)),
        }
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _cfg: &CallConfig,
    ) -> AutoGlmResult<ChunkStream> {
        let text = match self.next_reply(messages)? {
            ScriptedReply::Text(text) => text,
            ScriptedReply::ToolCall { content, .. } => content,
            ScriptedReply::Fail(message) => return Err(AutoGlmError::LlmProvider(message)),
        };
        let chars: Vec<char> = text.chars().collect();
        let mut chunks: Vec<AutoGlmResult<StreamChunk>> = chars
            .chunks(self.chunk_chars)
            .map(|piece| Ok(StreamChunk::content(piece.iter().collect::<String>())))
            .collect();
        chunks.push(Ok(StreamChunk::done()));
        let closed = CloseCounter(self.closed_streams.clone());
        let delivered = self.delivered_chunks.clone();
        Ok(stream::iter(chunks)
            .map(move |chunk| {
                let _open = &closed;
                delivered.fetch_add(1, Ordering::SeqCst);
                chunk
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::StreamChunkKind;

    #[tokio::test]
    async fn replays_in_order_then_exhausts() {
        let provider = ScriptedProvider::new([
            ScriptedReply::text("one"),
            ScriptedReply::Fail("boom".into()),
        ]);
        let cfg = CallConfig::default();
        assert_eq!(provider.chat(&[], &[], &cfg).await.unwrap().content, "one");
        assert!(provider.chat(&[], &[], &cfg).await.is_err());
        assert!(provider.chat(&[], &[], &cfg).await.is_err());
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn streams_text_in_chunks() {
        let provider = ScriptedProvider::new([ScriptedReply::text("abcdefg")]).with_chunk_chars(3);
        let chunks: Vec<_> = provider
            .stream_chat(&[], &CallConfig::default())
            .await
            .unwrap()
            .collect()
            .await;
        let contents: Vec<String> = chunks
            .iter()
            .filter_map(|c| c.as_ref().ok())
            .filter(|c| c.kind == StreamChunkKind::Content)
            .map(|c| c.content.clone())
            .collect();
        assert_eq!(contents, vec!["abc", "def", "g"]);
        assert_eq!(provider.delivered_chunks(), 4);
        assert_eq!(provider.closed_streams(), 1);
    }

    #[tokio::test]
    async fn dropping_a_stream_early_counts_as_closed() {
        let provider = ScriptedProvider::new([ScriptedReply::text("abcdef")]).with_chunk_chars(1);
        let mut stream = provider
            .stream_chat(&[], &CallConfig::default())
            .await
            .unwrap();
        stream.next().await.unwrap().unwrap();
        assert_eq!(provider.closed_streams(), 0);
        drop(stream);
        assert_eq!(provider.closed_streams(), 1);
        assert_eq!(provider.delivered_chunks(), 1);
    }

    #[tokio::test]
    async fn repeating_reuses_last_reply() {
        let provider = ScriptedProvider::new([ScriptedReply::tool(
            "back",
            serde_json::json!({}),
        )])
        .repeating();
        let cfg = CallConfig::default();
        for _ in 0..3 {
            let resp = provider.chat(&[], &[], &cfg).await.unwrap();
            assert_eq!(resp.tool_calls[0].function.name, "back");
        }
    }
}
