//! Streaming event types and NDJSON decoding

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::error::Result;

/// Events emitted while a reply streams in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Raw text appended to the reply
    Delta { content: String },
    /// The backend signalled the end of the reply
    Done,
    /// The stream failed; no further events follow
    Error { message: String },
}

impl ChatEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done | ChatEvent::Error { .. })
    }
}

/// A stream of chat events
pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// One line of an NDJSON chat response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}

impl ChatChunk {
    /// Content carried by this chunk, if any
    pub fn content(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
    }
}

/// Parse one NDJSON line
pub fn parse_line(line: &str) -> Result<ChatChunk> {
    Ok(serde_json::from_str(line)?)
}

/// Splits a byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte character
/// split across network chunks is decoded intact. Blank lines are skipped.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes and return every line it completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buf, rest);
            if let Some(text) = decode_line(&line) {
                lines.push(text);
            }
        }
        lines
    }

    /// Return whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buf);
        decode_line(&line)
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
