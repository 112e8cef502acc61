//! duet-ai: chat backend client
//!
//! Message types, NDJSON stream decoding, the Ollama provider used by the
//! conversation engine, and an optional web search client.

pub mod error;
pub mod providers;
pub mod search;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::{ChatProvider, OllamaProvider};
pub use search::{SearchResult, WebSearch};
pub use stream::{ChatEvent, ChatEventStream};
pub use types::*;
