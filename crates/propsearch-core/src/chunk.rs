//! Streaming chunk adapters.
//!
//! Chat providers stream their answers as a sequence of frames whose shape
//! depends on the vendor. This module normalizes one frame into a [`Chunk`]
//! that separates "reasoning" output from "answer" output.
//!
//! # Adapters
//!
//! | Format | Endpoint hint | Wire shape |
//! |--------|---------------|------------|
//! | [`ChunkFormat::OpenAi`] | default | SSE `data:` frames, `choices[0].delta.content` |
//! | [`ChunkFormat::ReasoningContent`] | `deepseek`, `dashscope`, `siliconflow`, `moonshot` | as above, plus `delta.reasoning_content` |
//! | [`ChunkFormat::Ollama`] | `:11434`, `ollama` | NDJSON, `message.content` / `message.thinking`, `done` |
//!
//! The format is chosen once per client with [`ChunkFormat::for_endpoint`].
//! Unknown endpoints get the answer-only OpenAI shape.
//!
//! [`FrameSplitter`] turns arbitrarily split network reads into complete
//! newline-terminated frames before they reach [`ChunkFormat::parse_chunk`].

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// One normalized increment of a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub role: Option<String>,
    pub answer_text: String,
    pub reasoning_text: String,
    pub is_final: bool,
}

impl Chunk {
    /// Terminal marker with no text.
    pub fn final_marker() -> Self {
        Self {
            is_final: true,
            ..Self::default()
        }
    }

    /// True when the chunk carries no text at all.
    pub fn is_keep_alive(&self) -> bool {
        self.answer_text.is_empty() && self.reasoning_text.is_empty() && !self.is_final
    }
}

/// A frame that could not be decoded. Callers log and skip it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkParseError {
    #[error("frame is not valid UTF-8")]
    Utf8,
    #[error("frame is not valid JSON: {0}")]
    Json(String),
    #[error("unexpected frame shape: {0}")]
    Shape(String),
    #[error("provider reported an error: {0}")]
    Provider(String),
}

/// Wire format of a provider's streaming frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFormat {
    /// OpenAI-compatible SSE, answer text only.
    OpenAi,
    /// OpenAI-compatible SSE with a separate `reasoning_content` channel.
    ReasoningContent,
    /// Ollama `/api/chat` newline-delimited JSON.
    Ollama,
}

const REASONING_HOSTS: &[&str] = &["deepseek", "dashscope", "siliconflow", "moonshot"];

impl ChunkFormat {
    /// Classify an endpoint by its base URL.
    pub fn for_endpoint(base_url: &str) -> Self {
        let url = base_url.to_lowercase();
        if url.contains(":11434") || url.contains("ollama") {
            ChunkFormat::Ollama
        } else if REASONING_HOSTS.iter().any(|h| url.contains(h)) {
            ChunkFormat::ReasoningContent
        } else {
            ChunkFormat::OpenAi
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChunkFormat::OpenAi => "openai",
            ChunkFormat::ReasoningContent => "reasoning_content",
            ChunkFormat::Ollama => "ollama",
        }
    }

    /// Decode one frame. Blank lines and SSE comments decode to a
    /// keep-alive chunk.
    pub fn parse_chunk(&self, raw: &[u8]) -> Result<Chunk, ChunkParseError> {
        let text = std::str::from_utf8(raw).map_err(|_| ChunkParseError::Utf8)?;
        let line = text.trim();
        match self {
            ChunkFormat::OpenAi => parse_sse_frame(line, false),
            ChunkFormat::ReasoningContent => parse_sse_frame(line, true),
            ChunkFormat::Ollama => parse_ndjson_frame(line),
        }
    }
}

fn parse_sse_frame(line: &str, with_reasoning: bool) -> Result<Chunk, ChunkParseError> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(Chunk::default());
    }

    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None if is_sse_field(line) => return Ok(Chunk::default()),
        None => line,
    };

    if payload == "[DONE]" {
        return Ok(Chunk::final_marker());
    }

    let value: Value =
        serde_json::from_str(payload).map_err(|e| ChunkParseError::Json(e.to_string()))?;

    if let Some(err) = value.get("error") {
        return Err(ChunkParseError::Provider(error_message(err)));
    }

    let choices = value.get("choices").and_then(Value::as_array);
    let choice = match choices {
        Some(list) => match list.first() {
            Some(c) => c,
            // usage-only trailer frames carry an empty choices array
            None => return Ok(Chunk::default()),
        },
        None => return Err(ChunkParseError::Shape("missing `choices`".to_string())),
    };

    let delta = choice.get("delta").or_else(|| choice.get("message"));
    let text_field = |key: &str| -> String {
        delta
            .and_then(|d| d.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let reasoning_text = if with_reasoning {
        let primary = text_field("reasoning_content");
        if primary.is_empty() {
            text_field("reasoning")
        } else {
            primary
        }
    } else {
        String::new()
    };

    Ok(Chunk {
        role: delta
            .and_then(|d| d.get("role"))
            .and_then(Value::as_str)
            .map(str::to_string),
        answer_text: text_field("content"),
        reasoning_text,
        is_final: choice
            .get("finish_reason")
            .map(|f| !f.is_null())
            .unwrap_or(false),
    })
}

fn parse_ndjson_frame(line: &str) -> Result<Chunk, ChunkParseError> {
    if line.is_empty() {
        return Ok(Chunk::default());
    }

    let value: Value =
        serde_json::from_str(line).map_err(|e| ChunkParseError::Json(e.to_string()))?;

    if let Some(err) = value.get("error") {
        return Err(ChunkParseError::Provider(error_message(err)));
    }

    let message = value
        .get("message")
        .ok_or_else(|| ChunkParseError::Shape("missing `message`".to_string()))?;
    let text_field = |key: &str| -> String {
        message
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(Chunk {
        role: message
            .get("role")
            .and_then(Value::as_str)
            .map(str::to_string),
        answer_text: text_field("content"),
        reasoning_text: text_field("thinking"),
        is_final: value.get("done").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

fn error_message(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Reassembles newline-delimited frames from arbitrarily split byte reads.
///
/// Splitting happens on `\n` bytes only, so multi-byte UTF-8 sequences that
/// straddle two reads are kept intact.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and collect every frame completed by them. Empty lines
    /// (SSE event separators) are dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                frames.push(line);
            }
        }
        frames
    }

    /// Flush a trailing frame that was not newline-terminated.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buf);
        let trimmed_len = rest
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map(|p| p + 1)?;
        Some(rest[..trimmed_len].to_vec())
    }
}
