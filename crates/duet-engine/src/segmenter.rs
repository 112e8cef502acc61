//! Splits streamed visible text into sentences for speech.

/// Characters that end a sentence.
pub const TERMINATORS: &[char] = &['。', '！', '？', '.', '!', '?', '\n'];

fn is_terminator(c: char) -> bool {
    TERMINATORS.contains(&c)
}

/// Accumulates text deltas and emits complete sentences.
#[derive(Debug, Default, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text received but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Append a delta and return every sentence it completed.
    pub fn feed(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let Some((idx, c)) = self
            .buffer
            .char_indices()
            .rev()
            .find(|&(_, c)| is_terminator(c))
        else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(idx + c.len_utf8());
        let complete = std::mem::replace(&mut self.buffer, rest);
        split_sentences(&complete)
    }

    /// Emit whatever remains as a final unit.
    pub fn flush(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.buffer);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Drop up to `bytes` trailing bytes of unemitted text. Returns how many
    /// were dropped; text already emitted cannot be recalled.
    pub fn retract(&mut self, bytes: usize) -> usize {
        let mut keep = self.buffer.len().saturating_sub(bytes);
        while !self.buffer.is_char_boundary(keep) {
            keep -= 1;
        }
        let dropped = self.buffer.len() - keep;
        self.buffer.truncate(keep);
        dropped
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Split complete text into trimmed, non-empty sentences. Text after the last
/// terminator forms its own unit.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if is_terminator(c) {
            let end = idx + c.len_utf8();
            push_trimmed(&mut out, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut out, &text[start..]);
    out
}

fn push_trimmed(out: &mut Vec<String>, sentence: &str) {
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        out.push(sentence.to_string());
    }
}
