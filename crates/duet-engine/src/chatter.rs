//! Turn-taking between the two speakers ("chatter" mode).
//!
//! The machine only decides; the engine performs the dispatches, timeline
//! echoes and timer sleeps it asks for.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::timeline::{Speaker, SpeakerMap};

pub const DEFAULT_TURN_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BUSY_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_CONTINUE_PROMPT: &str = "Keep going.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "speaker", rename_all = "snake_case")]
pub enum TurnState {
    WaitingForTurn(Speaker),
    Generating(Speaker),
    AwaitingSpeechIdle(Speaker),
}

impl Default for TurnState {
    fn default() -> Self {
        TurnState::WaitingForTurn(Speaker::Base)
    }
}

#[derive(Debug, Clone)]
pub struct ChatterConfig {
    /// Delay before an automatic turn; zero disables automatic turns
    pub interval: Duration,
    /// Retry delay while a request or voice capture is in progress
    pub busy_backoff: Duration,
    /// Sent as a transient user turn when the counterpart has said nothing
    pub continue_prompt: String,
}

impl Default for ChatterConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_TURN_INTERVAL,
            busy_backoff: DEFAULT_BUSY_BACKOFF,
            continue_prompt: DEFAULT_CONTINUE_PROMPT.to_string(),
        }
    }
}

/// A turn the engine should dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub speaker: Speaker,
    /// Transient user prompt, sent but not stored
    pub prompt: Option<String>,
}

/// Text to append as a user message to the counterpart's timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Echo {
    pub to: Speaker,
    pub text: String,
}

#[derive(Debug)]
pub struct TurnTaking {
    config: ChatterConfig,
    enabled: bool,
    state: TurnState,
    /// Where to return when a generation finishes while chatter is off
    resume: Speaker,
    deadline: Option<Instant>,
    last_output: SpeakerMap<String>,
}

impl TurnTaking {
    pub fn new(config: ChatterConfig) -> Self {
        Self {
            config,
            enabled: false,
            state: TurnState::default(),
            resume: Speaker::Base,
            deadline: None,
            last_output: SpeakerMap::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// When the turn timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn arm(&mut self, now: Instant) {
        self.deadline = if self.enabled && !self.config.interval.is_zero() {
            Some(now + self.config.interval)
        } else {
            None
        };
    }

    pub fn enable(&mut self, now: Instant) {
        self.enabled = true;
        if let TurnState::WaitingForTurn(_) = self.state {
            self.arm(now);
        }
    }

    /// Stop automatic turns. Timelines are left untouched.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.deadline = None;
        if let TurnState::AwaitingSpeechIdle(next) = self.state {
            self.state = TurnState::WaitingForTurn(next);
        }
    }

    /// Called when the timer deadline is reached. Returns the turn to send,
    /// or reschedules with a short backoff while `busy`.
    pub fn poll(&mut self, now: Instant, busy: bool) -> Option<TurnRequest> {
        match self.deadline {
            Some(deadline) if deadline <= now => {}
            _ => return None,
        }
        self.deadline = None;
        if !self.enabled {
            return None;
        }
        let TurnState::WaitingForTurn(speaker) = self.state else {
            return None;
        };
        if busy {
            tracing::debug!(%speaker, "turn deferred, engine busy");
            self.deadline = Some(now + self.config.busy_backoff);
            return None;
        }

        let prompt = self.last_output[speaker.other()]
            .trim()
            .is_empty()
            .then(|| self.config.continue_prompt.clone());
        self.resume = speaker;
        self.state = TurnState::Generating(speaker);
        Some(TurnRequest { speaker, prompt })
    }

    /// A request for `speaker` was sent, automatically or by the user.
    pub fn on_dispatch(&mut self, speaker: Speaker) {
        if let TurnState::WaitingForTurn(next) | TurnState::AwaitingSpeechIdle(next) = self.state {
            self.resume = next;
        }
        self.state = TurnState::Generating(speaker);
        self.deadline = None;
    }

    /// A generation finished. With chatter on, returns the echo for the
    /// counterpart and flips the turn; the timer waits for speech when
    /// `speech_pending`.
    pub fn on_generation_complete(
        &mut self,
        speaker: Speaker,
        text: &str,
        speech_pending: bool,
        now: Instant,
    ) -> Option<Echo> {
        if !self.enabled {
            self.state = TurnState::WaitingForTurn(self.resume);
            return None;
        }

        let text = text.trim();
        self.last_output[speaker] = text.to_string();
        let next = speaker.other();
        let echo = (!text.is_empty()).then(|| Echo {
            to: next,
            text: text.to_string(),
        });

        if speech_pending {
            self.state = TurnState::AwaitingSpeechIdle(next);
            self.deadline = None;
        } else {
            self.state = TurnState::WaitingForTurn(next);
            self.arm(now);
        }
        echo
    }

    /// The utterance queue drained.
    pub fn on_speech_idle(&mut self, now: Instant) {
        if let TurnState::AwaitingSpeechIdle(next) = self.state {
            self.state = TurnState::WaitingForTurn(next);
            self.arm(now);
        }
    }

    /// A generation failed or was cancelled; the same speaker gets the next turn.
    pub fn on_generation_failed(&mut self, speaker: Speaker, now: Instant) {
        self.state = TurnState::WaitingForTurn(if self.enabled { speaker } else { self.resume });
        self.arm(now);
    }

    /// Voice capture ended; rearm the timer so chatter resumes.
    pub fn on_voice_capture_finished(&mut self, now: Instant) {
        if let TurnState::WaitingForTurn(_) = self.state {
            self.arm(now);
        }
    }

    /// Change the turn delay. A waiting turn restarts its timer.
    pub fn set_interval(&mut self, interval: Duration, now: Instant) {
        self.config.interval = interval;
        if let TurnState::WaitingForTurn(_) = self.state {
            self.arm(now);
        }
    }

    /// Forget remembered outputs and return to the initial state.
    pub fn reset(&mut self, now: Instant) {
        self.last_output = SpeakerMap::default();
        self.resume = Speaker::Base;
        self.state = TurnState::default();
        self.arm(now);
    }
}
