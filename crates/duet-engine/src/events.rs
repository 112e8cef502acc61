//! Engine event types

use serde::{Deserialize, Serialize};

use crate::{
    chatter::TurnState,
    handle::GenerationToken,
    timeline::Speaker,
};

/// Events broadcast to render, speech and UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A render surface for a new reply should be created
    MessageStart {
        speaker: Speaker,
        speaker_name: String,
        token: GenerationToken,
    },

    /// Append text to the reply's surface
    RenderAppend {
        speaker_name: String,
        delta: String,
        token: GenerationToken,
    },

    /// Replace the reply's surface content
    RenderReplace {
        speaker_name: String,
        text: String,
        token: GenerationToken,
    },

    /// The model entered or left a reasoning span
    Reasoning { active: bool, token: GenerationToken },

    /// An utterance was handed to the synthesizer
    SpeakNow { speaker: Speaker, text: String },

    /// All dispatched utterances finished
    SpeechIdle,

    /// A reply finished and was added to the speaker's timeline
    TurnComplete { speaker: Speaker, text: String },

    /// The chatter state machine moved
    TurnStateChanged { state: TurnState },

    /// A request started or finished; input should be disabled while true
    ProcessingChanged { processing: bool },

    /// Voice capture should start now
    ListenRequested,

    /// Informational message for the user
    Notice { message: String },

    /// The active reply was cancelled
    Cancelled { speaker: Speaker },

    /// Error occurred
    Error {
        speaker: Option<Speaker>,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let ev = EngineEvent::TurnComplete {
            speaker: Speaker::Chatter,
            text: "hi".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "turn_complete");
        assert_eq!(json["speaker"], "chatter");
    }
}
