//! Serialized speech output.
//!
//! [`UtteranceQueue`] owns the speech backend, counts utterances in flight and
//! reports when speech becomes idle so turn-taking can continue.

use std::{
    collections::{HashSet, VecDeque},
    sync::LazyLock,
    time::Duration,
};

use regex::Regex;
use uuid::Uuid;

use crate::{
    error::Result,
    timeline::{Speaker, SpeakerMap, VoiceSettings},
};

/// Default length of the silent warm-up utterance.
pub const DEFAULT_WARMUP: Duration = Duration::from_millis(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtteranceKind {
    Warmup,
    Speech,
}

/// Identifies one dispatched utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtteranceId {
    pub kind: UtteranceKind,
    pub id: Uuid,
}

impl UtteranceId {
    pub fn new(kind: UtteranceKind) -> Self {
        Self {
            kind,
            id: Uuid::new_v4(),
        }
    }

    pub fn is_warmup(&self) -> bool {
        self.kind == UtteranceKind::Warmup
    }
}

impl std::fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            UtteranceKind::Warmup => write!(f, "warmup_{}", self.id),
            UtteranceKind::Speech => write!(f, "utt_{}", self.id),
        }
    }
}

/// Callbacks from a speech backend, delivered to the engine asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    /// The backend finished initializing
    Ready,
    Started(UtteranceId),
    Done(UtteranceId),
    Failed { id: UtteranceId, message: String },
}

/// A speech synthesizer. Calls return once the utterance is queued; progress
/// is reported later through [`SpeechEvent`]s.
pub trait SpeechEngine: Send {
    fn apply_voice(&mut self, voice: &VoiceSettings) -> Result<()>;

    /// Queue `text` behind anything already playing.
    fn speak(&mut self, id: UtteranceId, text: &str) -> Result<()>;

    fn play_silence(&mut self, id: UtteranceId, duration: Duration) -> Result<()>;

    /// Stop current playback and drop anything queued.
    fn stop(&mut self);
}

/// Text waiting for the backend to become ready.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUtterance {
    pub text: String,
    pub speaker: Speaker,
}

static SPEECH_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"[\n\r\t]", "、"),
        (r"[!@#$%^&*()_+={}\[\]|\\:;<>.?/]", "、"),
        ("[,\u{201c}\u{201d}]", " "),
        (r"、+", "、"),
        (r"\s+", " "),
    ]
    .into_iter()
    .filter_map(|(p, r)| Regex::new(p).ok().map(|re| (re, r)))
    .collect()
});

/// Replace markup and symbols with pauses so they are not read aloud.
pub fn normalize_for_speech(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in SPEECH_RULES.iter() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out.trim_matches(|c: char| c.is_whitespace() || c == '、')
        .to_string()
}

/// A dispatched utterance, reported back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub id: UtteranceId,
    pub text: String,
    pub speaker: Speaker,
}

pub struct UtteranceQueue {
    engine: Box<dyn SpeechEngine>,
    warmup: Duration,
    ready: bool,
    needs_warmup: bool,
    in_flight: HashSet<UtteranceId>,
    speaking: bool,
    waiting: VecDeque<PendingUtterance>,
}

impl std::fmt::Debug for UtteranceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtteranceQueue")
            .field("ready", &self.ready)
            .field("needs_warmup", &self.needs_warmup)
            .field("in_flight", &self.in_flight.len())
            .field("speaking", &self.speaking)
            .field("waiting", &self.waiting.len())
            .finish()
    }
}

impl UtteranceQueue {
    pub fn new(engine: Box<dyn SpeechEngine>, warmup: Duration) -> Self {
        Self {
            engine,
            warmup,
            ready: false,
            needs_warmup: true,
            in_flight: HashSet::new(),
            speaking: false,
            waiting: VecDeque::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Whether a non-warm-up utterance is playing.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Speak `text` as `speaker`, or hold it until the backend is ready.
    pub fn speak(
        &mut self,
        text: &str,
        speaker: Speaker,
        voices: &SpeakerMap<VoiceSettings>,
    ) -> Option<Dispatched> {
        if !self.ready {
            self.waiting.push_back(PendingUtterance {
                text: text.to_string(),
                speaker,
            });
            return None;
        }
        self.dispatch(text, speaker, &voices[speaker])
    }

    /// Mark the backend ready and drain held utterances in order.
    pub fn on_ready(&mut self, voices: &SpeakerMap<VoiceSettings>) -> Vec<Dispatched> {
        self.ready = true;
        let waiting: Vec<_> = self.waiting.drain(..).collect();
        waiting
            .into_iter()
            .filter_map(|p| self.dispatch(&p.text, p.speaker, &voices[p.speaker]))
            .collect()
    }

    fn dispatch(&mut self, text: &str, speaker: Speaker, voice: &VoiceSettings) -> Option<Dispatched> {
        let clean = normalize_for_speech(text);
        if clean.is_empty() {
            return None;
        }
        if let Err(e) = self.engine.apply_voice(voice) {
            tracing::warn!(error = %e, %speaker, "failed to apply voice settings");
        }
        self.warm_up();

        let id = UtteranceId::new(UtteranceKind::Speech);
        match self.engine.speak(id, &clean) {
            Ok(()) => {
                self.in_flight.insert(id);
                tracing::debug!(%id, %speaker, pending = self.in_flight.len(), "utterance dispatched");
                Some(Dispatched {
                    id,
                    text: clean,
                    speaker,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, %speaker, "speech dispatch failed");
                None
            }
        }
    }

    fn warm_up(&mut self) {
        if !self.needs_warmup || self.warmup.is_zero() {
            self.needs_warmup = false;
            return;
        }
        self.needs_warmup = false;
        let id = UtteranceId::new(UtteranceKind::Warmup);
        match self.engine.play_silence(id, self.warmup) {
            Ok(()) => {
                self.in_flight.insert(id);
            }
            Err(e) => tracing::warn!(error = %e, "speech warm-up failed"),
        }
    }

    pub fn on_started(&mut self, id: UtteranceId) {
        if !id.is_warmup() {
            self.speaking = true;
        }
    }

    /// Completion or failure of an utterance. Returns `true` when this made
    /// the queue idle, which also re-arms the warm-up. Ids not in flight,
    /// such as those stopped by [`cancel_all`](Self::cancel_all), are ignored.
    pub fn on_finished(&mut self, id: UtteranceId) -> bool {
        if !self.in_flight.remove(&id) {
            return false;
        }
        if !id.is_warmup() {
            self.speaking = false;
        }
        if self.in_flight.is_empty() {
            self.needs_warmup = true;
            return true;
        }
        false
    }

    /// Stop speech, drop held utterances and re-arm the warm-up.
    pub fn cancel_all(&mut self) {
        self.engine.stop();
        self.waiting.clear();
        self.in_flight.clear();
        self.speaking = false;
        self.needs_warmup = true;
    }
}
