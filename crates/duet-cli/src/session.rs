//! Conversation transcripts in JSONL format

use duet_engine::Speaker;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Transcript entry types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// Written once at the top of each file
    Metadata {
        id: String,
        created_at: i64,
        base_model: String,
        chatter_model: String,
    },
    /// Text typed by the user
    User { text: String, timestamp: i64 },
    /// A completed reply
    Turn {
        speaker: Speaker,
        name: String,
        text: String,
        timestamp: i64,
    },
}

/// Appends entries to a transcript file
pub struct Transcript {
    id: String,
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Transcript {
    /// Get the transcripts directory
    pub fn transcripts_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("duet")
            .join("transcripts")
    }

    /// Start a new transcript in `dir`
    pub fn create(dir: &Path, base_model: &str, chatter_model: &str) -> std::io::Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{id}.jsonl"));
        let writer = BufWriter::new(File::create(&path)?);

        let mut transcript = Self { id, path, writer };
        transcript.append(&TranscriptEntry::Metadata {
            id: transcript.id.clone(),
            created_at: now(),
            base_model: base_model.to_string(),
            chatter_model: chatter_model.to_string(),
        })?;
        Ok(transcript)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_user(&mut self, text: &str) -> std::io::Result<()> {
        self.append(&TranscriptEntry::User {
            text: text.to_string(),
            timestamp: now(),
        })
    }

    pub fn append_turn(&mut self, speaker: Speaker, name: &str, text: &str) -> std::io::Result<()> {
        self.append(&TranscriptEntry::Turn {
            speaker,
            name: name.to_string(),
            text: text.to_string(),
            timestamp: now(),
        })
    }

    fn append(&mut self, entry: &TranscriptEntry) -> std::io::Result<()> {
        writeln!(self.writer, "{}", serde_json::to_string(entry)?)?;
        self.writer.flush()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
