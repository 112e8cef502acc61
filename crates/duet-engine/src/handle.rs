//! A cloneable handle for driving the engine from external code.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    engine::{Command, Snapshot},
    error::{Error, Result},
    events::EngineEvent,
    timeline::{Speaker, SpeakerProfile},
    utterance::SpeechEvent,
};

/// Identifies one stream session. Callbacks carrying an older token are ignored.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GenerationToken(u64);

impl std::fmt::Display for GenerationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic source of generation tokens.
#[derive(Debug, Default)]
pub struct Generation {
    current: GenerationToken,
}

impl Generation {
    /// Invalidate the current token and return a fresh one.
    pub fn advance(&mut self) -> GenerationToken {
        self.current = GenerationToken(self.current.0 + 1);
        self.current
    }

    pub fn current(&self) -> GenerationToken {
        self.current
    }
}

/// A cloneable handle for poking the engine from external code.
///
/// All fields are `Arc`-wrapped or channel senders, so cloning is cheap.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) events: broadcast::Sender<EngineEvent>,
    pub(crate) idle_notify: Arc<tokio::sync::Notify>,
    pub(crate) is_processing: Arc<AtomicBool>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Append user text to the base speaker's timeline and request a reply.
    pub fn submit(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Submit { text: text.into() })
    }

    /// Request a turn from `speaker`, optionally with a transient user prompt
    /// that is sent but not stored.
    pub fn send_as(&self, speaker: Speaker, prompt: Option<String>) -> Result<()> {
        self.send(Command::SendAs { speaker, prompt })
    }

    /// Cancel the active stream and stop speech.
    pub fn cancel(&self) -> Result<()> {
        self.send(Command::Cancel)
    }

    pub fn set_chatter(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetChatter(enabled))
    }

    pub fn set_speech(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetSpeech(enabled))
    }

    pub fn set_auto_voice_input(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAutoVoiceInput(enabled))
    }

    /// Search the web before answering user input.
    pub fn set_web_search(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetWebSearch(enabled))
    }

    /// Delay before each automatic chatter turn; zero stops automatic turns.
    pub fn set_chatter_interval(&self, interval: std::time::Duration) -> Result<()> {
        self.send(Command::SetChatterInterval(interval))
    }

    /// Report that voice capture started or finished.
    pub fn voice_capture(&self, active: bool) -> Result<()> {
        self.send(Command::VoiceCapture { active })
    }

    pub fn update_profile(&self, speaker: Speaker, profile: SpeakerProfile) -> Result<()> {
        self.send(Command::UpdateProfile { speaker, profile })
    }

    pub fn set_history_limit(&self, limit: usize) -> Result<()> {
        self.send(Command::SetHistoryLimit(limit))
    }

    /// Reset both timelines to their system messages.
    pub fn clear(&self) -> Result<()> {
        self.send(Command::Clear)
    }

    /// Forward a callback from the speech backend.
    pub fn speech_event(&self, event: SpeechEvent) -> Result<()> {
        self.send(Command::Speech(event))
    }

    /// Copy of the engine's current state.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Stop the engine task.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Wait until no request is in flight.
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_processing.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Wait until no request is in flight, with a timeout.
    /// Returns `true` if idle was reached, `false` on timeout.
    pub async fn wait_for_idle_timeout(&self, timeout: std::time::Duration) -> bool {
        if !self.is_processing.load(Ordering::Acquire) {
            return true;
        }
        tokio::time::timeout(timeout, self.wait_for_idle())
            .await
            .is_ok()
    }

    /// Whether a request is currently in flight.
    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_advances_and_invalidates() {
        let mut generation = Generation::default();
        let a = generation.advance();
        assert_eq!(generation.current(), a);
        let b = generation.advance();
        assert!(b > a);
        assert_ne!(generation.current(), a);
        assert_eq!(generation.current(), b);
    }
}
