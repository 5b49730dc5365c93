use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> AutoGlmResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();

    if data == "[DONE]" {
        return Ok(Some(StreamChunk::done()));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| AutoGlmError::SseParsing(e.to_string()))?;

    if let Some(err) = json.get("error") {
        let message = err["message"].as_str().unwrap_or("unknown upstream error");
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Error,
            content: message.to_string(),
        }));
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    // Reasoning content (some models like DeepSeek expose this)
    if let Some(reasoning) = delta["reasoning_content"].as_str() {
        if !reasoning.is_empty() {
            return Ok(Some(StreamChunk {
                kind: StreamChunkKind::Reasoning,
                content: reasoning.to_string(),
            }));
        }
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array() {
        if !tool_calls.is_empty() {
            return Ok(Some(StreamChunk {
                kind: StreamChunkKind::ToolCall,
                content: serde_json::to_string(tool_calls)
                    .map_err(|e| AutoGlmError::SseParsing(e.to_string()))?,
            }));
        }
    }

    if let Some(content) = delta["content"].as_str() {
        if !content.is_empty() {
            return Ok(Some(StreamChunk::content(content)));
        }
    }

    // Finish reason signals done
    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(StreamChunk::done()));
    }

    Ok(None)
}

/// Reassembles SSE lines from arbitrary byte chunks.
///
/// Bytes are held until a newline arrives so multi-byte UTF-8 sequences split
/// across network chunks are decoded intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every complete non-empty line (trimmed).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}
