//! duet-engine: streaming conversation engine for two model speakers
//!
//! This crate turns streamed model output into rendered text and spoken
//! sentences, and alternates turns between a base speaker and a chatter
//! speaker that talk to each other.

pub mod chatter;
pub mod engine;
pub mod error;
pub mod events;
pub mod handle;
pub mod reasoning;
pub mod render;
pub mod search;
pub mod segmenter;
pub mod session;
pub mod timeline;
pub mod transport;
pub mod utterance;

pub use chatter::{ChatterConfig, TurnState, TurnTaking};
pub use engine::{Engine, EngineConfig, Snapshot};
pub use error::{Error, Result};
pub use events::EngineEvent;
pub use handle::{EngineHandle, GenerationToken};
pub use reasoning::{MarkerPair, ReasoningFilter, StreamingFilter};
pub use search::{Augmenter, WebSearchAugmenter};
pub use segmenter::SentenceSegmenter;
pub use timeline::{Speaker, SpeakerMap, SpeakerProfile, Timeline, VoiceSettings};
pub use transport::{ProviderTransport, Transport};
pub use utterance::{SpeechEngine, SpeechEvent, UtteranceId, UtteranceQueue};
