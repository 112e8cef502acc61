//! The interaction context: one task that owns all conversation state.
//!
//! Commands from [`EngineHandle`]s, stream events from the network task and
//! speech callbacks all arrive on one channel and are applied in order. The
//! render flush and the chatter turn timer are deadlines awaited in the same
//! loop, so no state is shared across tasks.

use std::{sync::Arc, sync::atomic::Ordering, time::Duration};

use duet_ai::{ChatEvent, ChatMessage, ChatRequest};
use futures::StreamExt;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    chatter::{ChatterConfig, TurnState, TurnTaking},
    events::EngineEvent,
    handle::{EngineHandle, GenerationToken},
    reasoning::{MarkerPair, ReasoningFilter, default_markers},
    render::{DEFAULT_RENDER_INTERVAL, RenderScheduler},
    search::{Augmenter, SEARCH_SYSTEM_PROMPT},
    session::{DEFAULT_NO_RESPONSE, SessionController, SessionEffect},
    timeline::{
        DEFAULT_NAME_TEMPLATE, Speaker, SpeakerMap, SpeakerProfile, Timeline, VoiceSettings,
        build_system_prompt,
    },
    transport::Transport,
    utterance::{DEFAULT_WARMUP, SpeechEngine, SpeechEvent, UtteranceQueue},
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub profiles: SpeakerMap<SpeakerProfile>,
    /// Trailing timeline messages sent with each request, besides the system message
    pub history_limit: usize,
    /// Ask the backend to stream replies
    pub streaming: bool,
    pub speech_enabled: bool,
    /// Request voice capture after each reply when chatter is off
    pub auto_voice_input: bool,
    pub chatter_enabled: bool,
    pub chatter: ChatterConfig,
    /// Search the web before answering user input, when an augmenter is set
    pub web_search: bool,
    pub render_interval: Duration,
    pub warmup: Duration,
    pub markers: Vec<MarkerPair>,
    pub name_template: String,
    pub no_response_text: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profiles: SpeakerMap::new(
                SpeakerProfile::new("Base", "default"),
                SpeakerProfile::new("Chatter", "default"),
            ),
            history_limit: 10,
            streaming: true,
            speech_enabled: false,
            auto_voice_input: false,
            chatter_enabled: false,
            chatter: ChatterConfig::default(),
            web_search: false,
            render_interval: DEFAULT_RENDER_INTERVAL,
            warmup: DEFAULT_WARMUP,
            markers: default_markers(),
            name_template: DEFAULT_NAME_TEMPLATE.to_string(),
            no_response_text: DEFAULT_NO_RESPONSE.to_string(),
        }
    }
}

/// Point-in-time copy of engine state
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timelines: SpeakerMap<Vec<ChatMessage>>,
    pub profiles: SpeakerMap<SpeakerProfile>,
    pub turn_state: TurnState,
    pub chatter_enabled: bool,
    pub speech_enabled: bool,
    pub auto_voice_input: bool,
    pub web_search: bool,
    pub processing: bool,
    /// A spoken utterance is playing; warm-up silence does not count
    pub speaking: bool,
    /// Utterances, including warm-up, are still in flight
    pub speech_pending: bool,
    pub history_limit: usize,
    pub chatter_interval: Duration,
}

pub(crate) enum Command {
    Submit {
        text: String,
    },
    SendAs {
        speaker: Speaker,
        prompt: Option<String>,
    },
    Cancel,
    SetChatter(bool),
    SetSpeech(bool),
    SetAutoVoiceInput(bool),
    SetWebSearch(bool),
    SetChatterInterval(Duration),
    VoiceCapture {
        active: bool,
    },
    UpdateProfile {
        speaker: Speaker,
        profile: SpeakerProfile,
    },
    SetHistoryLimit(usize),
    Clear,
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
    Stream {
        token: GenerationToken,
        event: ChatEvent,
    },
    Speech(SpeechEvent),
}

/// The conversation engine
pub struct Engine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    augmenter: Option<Arc<dyn Augmenter>>,
    timelines: SpeakerMap<Timeline>,
    voices: SpeakerMap<VoiceSettings>,
    sessions: SessionController,
    utterances: UtteranceQueue,
    turns: TurnTaking,
    listening: bool,
    /// Voice capture requested once speech drains
    listen_after_speech: bool,
    stream_cancel: Option<CancellationToken>,
    commands: mpsc::UnboundedReceiver<Command>,
    event_tx: broadcast::Sender<EngineEvent>,
    handle: EngineHandle,
}

impl Engine {
    /// Create an engine. `speech` builds the speech backend from a handle it
    /// can use to report [`SpeechEvent`]s.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        speech: impl FnOnce(EngineHandle) -> Box<dyn SpeechEngine>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let handle = EngineHandle {
            commands: commands_tx,
            events: event_tx.clone(),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
            is_processing: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };

        let timelines = SpeakerMap::from_fn(|s| {
            let profile = &config.profiles[s];
            Timeline::new(build_system_prompt(
                &profile.system_prompt,
                &profile.name,
                &config.name_template,
            ))
        });
        let voices = config.profiles.map(|_, p| p.voice.clone());
        let sessions = SessionController::new(
            ReasoningFilter::new(config.markers.clone()),
            RenderScheduler::new(config.render_interval),
        )
        .with_no_response_text(config.no_response_text.clone());
        let utterances = UtteranceQueue::new(speech(handle.clone()), config.warmup);
        let mut turns = TurnTaking::new(config.chatter.clone());
        if config.chatter_enabled {
            turns.enable(Instant::now());
        }

        Self {
            config,
            transport,
            augmenter: None,
            timelines,
            voices,
            sessions,
            utterances,
            turns,
            listening: false,
            listen_after_speech: false,
            stream_cancel: None,
            commands,
            event_tx,
            handle,
        }
    }

    /// Rewrite user input before it is sent while web search is enabled.
    pub fn with_augmenter(mut self, augmenter: Arc<dyn Augmenter>) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    /// Get a cloneable handle for this engine
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Run the engine on a new task.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Process commands until shutdown.
    pub async fn run(mut self) {
        tracing::debug!("engine started");
        loop {
            let render_at = self.sessions.render_deadline();
            let turn_at = self.turns.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command),
                },
                _ = sleep_until(render_at) => self.flush_render(),
                _ = sleep_until(turn_at) => self.poll_turn(),
            }
        }
        self.abort_stream();
        self.utterances.cancel_all();
        self.set_processing(false);
        tracing::debug!("engine stopped");
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_processing(&self, processing: bool) {
        let was = self.handle.is_processing.swap(processing, Ordering::AcqRel);
        if was != processing {
            if !processing {
                self.handle.idle_notify.notify_waiters();
            }
            self.emit(EngineEvent::ProcessingChanged { processing });
        }
    }

    fn emit_turn_state(&self, before: TurnState) {
        let state = self.turns.state();
        if state != before {
            self.emit(EngineEvent::TurnStateChanged { state });
        }
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Submit { text } => {
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                self.timelines[Speaker::Base].push_user(text);
                self.dispatch(Speaker::Base, None, self.searching());
            }
            Command::SendAs { speaker, prompt } => self.dispatch(speaker, prompt, false),
            Command::Cancel => {
                self.listen_after_speech = false;
                let stopped = self.stop_speech();
                if !self.cancel_session() && !stopped {
                    self.emit(EngineEvent::Notice {
                        message: "Nothing to cancel".to_string(),
                    });
                }
            }
            Command::SetChatter(enabled) => {
                let before = self.turns.state();
                if enabled {
                    self.turns.enable(now);
                    self.listen_after_speech = false;
                } else {
                    self.turns.disable();
                }
                tracing::info!(enabled, "chatter mode changed");
                self.emit_turn_state(before);
            }
            Command::SetSpeech(enabled) => {
                self.config.speech_enabled = enabled;
                tracing::info!(enabled, "speech output changed");
                if !enabled {
                    self.stop_speech();
                }
            }
            Command::SetAutoVoiceInput(enabled) => {
                self.config.auto_voice_input = enabled;
                if !enabled {
                    self.listen_after_speech = false;
                }
            }
            Command::SetWebSearch(enabled) => {
                self.config.web_search = enabled;
                if enabled && self.augmenter.is_none() {
                    self.emit(EngineEvent::Notice {
                        message: "Web search is not configured".to_string(),
                    });
                }
            }
            Command::SetChatterInterval(interval) => {
                self.config.chatter.interval = interval;
                self.turns.set_interval(interval, now);
            }
            Command::VoiceCapture { active } => {
                self.listening = active;
                if !active {
                    self.turns.on_voice_capture_finished(now);
                }
            }
            Command::UpdateProfile { speaker, profile } => {
                self.timelines[speaker].refresh_system_prompt(build_system_prompt(
                    &profile.system_prompt,
                    &profile.name,
                    &self.config.name_template,
                ));
                self.voices[speaker] = profile.voice.clone();
                self.config.profiles[speaker] = profile;
            }
            Command::SetHistoryLimit(limit) => self.config.history_limit = limit,
            Command::Clear => {
                self.listen_after_speech = false;
                self.stop_speech();
                self.cancel_session();
                for speaker in Speaker::ALL {
                    self.timelines[speaker].clear();
                }
                let before = self.turns.state();
                self.turns.reset(now);
                self.emit_turn_state(before);
                self.emit(EngineEvent::Notice {
                    message: "Conversation cleared".to_string(),
                });
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
            Command::Stream { token, event } => self.on_stream_event(token, event),
            Command::Speech(event) => self.on_speech_event(event),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            timelines: self.timelines.map(|_, t| t.messages().to_vec()),
            profiles: self.config.profiles.clone(),
            turn_state: self.turns.state(),
            chatter_enabled: self.turns.is_enabled(),
            speech_enabled: self.config.speech_enabled,
            auto_voice_input: self.config.auto_voice_input,
            web_search: self.config.web_search,
            processing: self.handle.is_processing(),
            speaking: self.utterances.is_speaking(),
            speech_pending: !self.utterances.is_idle(),
            history_limit: self.config.history_limit,
            chatter_interval: self.config.chatter.interval,
        }
    }

    fn searching(&self) -> bool {
        self.config.web_search && self.augmenter.is_some()
    }

    /// Start a request for `speaker`, superseding any request in flight.
    /// With `search`, the latest user message is augmented before sending.
    fn dispatch(&mut self, speaker: Speaker, prompt: Option<String>, search: bool) {
        let before = self.turns.state();
        self.cancel_session();
        self.listen_after_speech = false;
        self.stop_speech();
        self.turns.on_dispatch(speaker);

        let mut messages = self.timelines[speaker].window(self.config.history_limit);
        if search {
            if let Some(system) = messages.first_mut() {
                system.content = format!("{}\n{SEARCH_SYSTEM_PROMPT}", system.content);
            }
        }
        if let Some(prompt) = prompt {
            messages.push(ChatMessage::user(prompt));
        }
        let mut request = ChatRequest::new(self.config.profiles[speaker].model.clone(), messages)
            .with_stream(self.config.streaming);
        let augmenter = self.augmenter.clone().filter(|_| search);

        let token = self.sessions.start(speaker);
        tracing::debug!(%token, %speaker, model = %request.model, messages = request.messages.len(), "dispatching turn");
        self.set_processing(true);
        self.emit_turn_state(before);

        let cancel = CancellationToken::new();
        self.stream_cancel = Some(cancel.clone());
        let transport = Arc::clone(&self.transport);
        let tx = self.handle.commands.clone();
        tokio::spawn(async move {
            if let Some(augmenter) = augmenter {
                let text = request
                    .messages
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    augmented = augmenter.augment(&request.model, &text) => {
                        if let (Some(augmented), Some(last)) = (augmented, request.messages.last_mut()) {
                            last.content = augmented;
                        }
                    }
                }
            }
            let mut finished = false;
            match transport.run(request, cancel.clone()).await {
                Ok(mut stream) => {
                    while let Some(event) = stream.next().await {
                        finished = event.is_terminal();
                        if tx.send(Command::Stream { token, event }).is_err() || finished {
                            break;
                        }
                    }
                }
                Err(e) => {
                    finished = true;
                    let _ = tx.send(Command::Stream {
                        token,
                        event: ChatEvent::Error {
                            message: e.to_string(),
                        },
                    });
                }
            }
            if !finished && !cancel.is_cancelled() {
                let _ = tx.send(Command::Stream {
                    token,
                    event: ChatEvent::Done,
                });
            }
        });
    }

    fn active(&self) -> Option<(GenerationToken, Speaker)> {
        self.sessions.active().map(|s| (s.token, s.speaker))
    }

    fn abort_stream(&mut self) {
        if let Some(cancel) = self.stream_cancel.take() {
            cancel.cancel();
        }
    }

    /// Cancel the active session, if any. Returns `true` if one was cancelled.
    fn cancel_session(&mut self) -> bool {
        let Some((token, speaker)) = self.active() else {
            return false;
        };
        let effects = self.sessions.cancel(token);
        self.abort_stream();
        self.apply(token, speaker, effects);
        true
    }

    /// Stop speech and run the idle transition if anything was in flight.
    /// Returns `true` if speech was stopped.
    fn stop_speech(&mut self) -> bool {
        let was_idle = self.utterances.is_idle();
        self.utterances.cancel_all();
        if !was_idle {
            self.on_speech_idle();
        }
        !was_idle
    }

    fn on_stream_event(&mut self, token: GenerationToken, event: ChatEvent) {
        let Some((active, speaker)) = self.active() else {
            return;
        };
        if active != token {
            tracing::trace!(%token, %active, "dropping stale stream event");
            return;
        }
        let speech = self.config.speech_enabled;
        let effects = match event {
            ChatEvent::Delta { content } => {
                self.sessions.on_delta(token, &content, speech, Instant::now())
            }
            ChatEvent::Done => {
                self.stream_cancel = None;
                self.sessions.on_complete(token, speech, &mut self.timelines)
            }
            ChatEvent::Error { message } => {
                self.stream_cancel = None;
                tracing::warn!(%speaker, error = %message, "stream failed");
                self.sessions.on_error(token, &message)
            }
        };
        self.apply(token, speaker, effects);
    }

    fn flush_render(&mut self) {
        let Some((token, speaker)) = self.active() else {
            return;
        };
        let effects = self.sessions.on_render_deadline(Instant::now());
        self.apply(token, speaker, effects);
    }

    fn poll_turn(&mut self) {
        let busy = self.sessions.active().is_some() || self.listening;
        if let Some(turn) = self.turns.poll(Instant::now(), busy) {
            tracing::debug!(speaker = %turn.speaker, "automatic turn");
            self.dispatch(turn.speaker, turn.prompt, false);
        }
    }

    fn apply(&mut self, token: GenerationToken, speaker: Speaker, effects: Vec<SessionEffect>) {
        let speaker_name = self.config.profiles[speaker].name.clone();
        for effect in effects {
            match effect {
                SessionEffect::SurfaceCreated { speaker } => self.emit(EngineEvent::MessageStart {
                    speaker,
                    speaker_name: speaker_name.clone(),
                    token,
                }),
                SessionEffect::Append { text } => self.emit(EngineEvent::RenderAppend {
                    speaker_name: speaker_name.clone(),
                    delta: text,
                    token,
                }),
                SessionEffect::Replace { text } => self.emit(EngineEvent::RenderReplace {
                    speaker_name: speaker_name.clone(),
                    text,
                    token,
                }),
                SessionEffect::Reasoning { active } => {
                    self.emit(EngineEvent::Reasoning { active, token })
                }
                SessionEffect::Sentence { text } => self.speak(&text, speaker),
                SessionEffect::Completed { speaker, text } => self.on_completed(speaker, text),
                SessionEffect::Failed { speaker, message } => {
                    self.emit(EngineEvent::Error {
                        speaker: Some(speaker),
                        message,
                    });
                    self.on_ended(speaker);
                }
                SessionEffect::Cancelled { speaker } => {
                    self.emit(EngineEvent::Cancelled { speaker });
                    self.on_ended(speaker);
                }
            }
        }
    }

    fn speak(&mut self, text: &str, speaker: Speaker) {
        if let Some(sent) = self.utterances.speak(text, speaker, &self.voices) {
            self.emit(EngineEvent::SpeakNow {
                speaker: sent.speaker,
                text: sent.text,
            });
        }
    }

    fn on_completed(&mut self, speaker: Speaker, text: Option<String>) {
        let now = Instant::now();
        let before = self.turns.state();
        if let Some(text) = &text {
            self.emit(EngineEvent::TurnComplete {
                speaker,
                text: text.clone(),
            });
        }

        let speech_pending = self.config.speech_enabled && !self.utterances.is_idle();
        let reply = text.as_deref().unwrap_or_default();
        if let Some(echo) = self
            .turns
            .on_generation_complete(speaker, reply, speech_pending, now)
        {
            self.timelines[echo.to].push_user(echo.text);
        }

        if !self.turns.is_enabled() && self.config.auto_voice_input {
            if speech_pending {
                self.listen_after_speech = true;
            } else {
                self.emit(EngineEvent::ListenRequested);
            }
        }
        self.emit_turn_state(before);
        self.set_processing(false);
    }

    /// A reply failed or was cancelled.
    fn on_ended(&mut self, speaker: Speaker) {
        let before = self.turns.state();
        self.set_processing(false);
        // a superseding dispatch sets its own state right after
        self.turns.on_generation_failed(speaker, Instant::now());
        self.emit_turn_state(before);
    }

    fn on_speech_event(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Ready => {
                tracing::debug!("speech backend ready");
                for sent in self.utterances.on_ready(&self.voices) {
                    self.emit(EngineEvent::SpeakNow {
                        speaker: sent.speaker,
                        text: sent.text,
                    });
                }
            }
            SpeechEvent::Started(id) => self.utterances.on_started(id),
            SpeechEvent::Done(id) => {
                if self.utterances.on_finished(id) {
                    self.on_speech_idle();
                }
            }
            SpeechEvent::Failed { id, message } => {
                tracing::warn!(%id, error = %message, "utterance failed");
                if self.utterances.on_finished(id) {
                    self.on_speech_idle();
                }
            }
        }
    }

    fn on_speech_idle(&mut self) {
        let before = self.turns.state();
        self.emit(EngineEvent::SpeechIdle);
        self.turns.on_speech_idle(Instant::now());
        if self.listen_after_speech {
            self.listen_after_speech = false;
            self.emit(EngineEvent::ListenRequested);
        }
        self.emit_turn_state(before);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
