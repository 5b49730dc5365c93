use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::errors::AutoGlmResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunk, ToolDef};

/// Stream of incremental chunks from a streaming completion.
/// Dropping it closes the underlying connection.
pub type ChunkStream = BoxStream<'static, AutoGlmResult<StreamChunk>>;

/// Unified LLM provider trait. All providers implement this trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches the config.toml key).
    fn name(&self) -> &str;

    /// Single non-streaming completion, optionally offering tools.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        cfg: &CallConfig,
    ) -> AutoGlmResult<LlmResponse>;

    /// Streaming text completion.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cfg: &CallConfig,
    ) -> AutoGlmResult<ChunkStream>;
}
