//! Per-request stream handling.
//!
//! [`SessionController`] owns the active [`StreamSession`], turns raw deltas
//! into render and speech effects, and finalizes or tears down the session.
//! Every entry point takes the caller's generation token; stale tokens do
//! nothing.

use tokio::time::Instant;

use crate::{
    handle::{Generation, GenerationToken},
    reasoning::{ReasoningFilter, StreamingFilter},
    render::RenderScheduler,
    segmenter::SentenceSegmenter,
    timeline::{Speaker, SpeakerMap, Timeline},
};

/// Placeholder shown when a reply has no visible text.
pub const DEFAULT_NO_RESPONSE: &str = "(no response)";

/// State of the request currently streaming.
#[derive(Debug)]
pub struct StreamSession {
    pub token: GenerationToken,
    pub speaker: Speaker,
    filter: StreamingFilter,
    last_visible: String,
    reasoning_active: bool,
    surface_ready: bool,
}

impl StreamSession {
    fn new(token: GenerationToken, speaker: Speaker, filter: ReasoningFilter) -> Self {
        Self {
            token,
            speaker,
            filter: StreamingFilter::new(filter),
            last_visible: String::new(),
            reasoning_active: false,
            surface_ready: false,
        }
    }

    pub fn raw(&self) -> &str {
        self.filter.raw()
    }

    pub fn visible(&self) -> &str {
        &self.last_visible
    }

}

/// What the engine should do in response to a session step.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// Create the render surface for this reply
    SurfaceCreated { speaker: Speaker },
    Append { text: String },
    /// Visible text shrank; replace the whole surface content
    Replace { text: String },
    /// A sentence ready for speech
    Sentence { text: String },
    Reasoning { active: bool },
    /// The reply finished. `text` is `None` when nothing visible was produced.
    Completed { speaker: Speaker, text: Option<String> },
    Failed { speaker: Speaker, message: String },
    Cancelled { speaker: Speaker },
}

#[derive(Debug)]
pub struct SessionController {
    generation: Generation,
    active: Option<StreamSession>,
    render: RenderScheduler,
    segmenter: SentenceSegmenter,
    filter: ReasoningFilter,
    no_response: String,
}

impl SessionController {
    pub fn new(filter: ReasoningFilter, render: RenderScheduler) -> Self {
        Self {
            generation: Generation::default(),
            active: None,
            render,
            segmenter: SentenceSegmenter::new(),
            filter,
            no_response: DEFAULT_NO_RESPONSE.to_string(),
        }
    }

    pub fn with_no_response_text(mut self, text: impl Into<String>) -> Self {
        self.no_response = text.into();
        self
    }

    pub fn active(&self) -> Option<&StreamSession> {
        self.active.as_ref()
    }

    /// Whether `token` belongs to the session still streaming.
    pub fn is_active(&self, token: GenerationToken) -> bool {
        self.active.as_ref().is_some_and(|s| s.token == token)
    }

    /// Deadline of the pending render flush, if any.
    pub fn render_deadline(&self) -> Option<Instant> {
        self.render.deadline()
    }

    /// Begin a session for `speaker`, invalidating any previous token.
    pub fn start(&mut self, speaker: Speaker) -> GenerationToken {
        let token = self.generation.advance();
        self.render.clear();
        self.segmenter.clear();
        self.active = Some(StreamSession::new(token, speaker, self.filter.clone()));
        tracing::debug!(%token, %speaker, "stream session started");
        token
    }

    pub fn on_delta(
        &mut self,
        token: GenerationToken,
        chunk: &str,
        speech_enabled: bool,
        now: Instant,
    ) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        let Some(session) = self.active.as_mut().filter(|s| s.token == token) else {
            return effects;
        };

        let filtered = session.filter.push(chunk).clone();
        if filtered.reasoning_active != session.reasoning_active {
            session.reasoning_active = filtered.reasoning_active;
            effects.push(SessionEffect::Reasoning {
                active: filtered.reasoning_active,
            });
        }

        let new = filtered.visible;
        if new == session.last_visible {
            return effects;
        }
        if !session.surface_ready {
            session.surface_ready = true;
            effects.push(SessionEffect::SurfaceCreated {
                speaker: session.speaker,
            });
        }

        let common = common_prefix_len(&session.last_visible, &new);
        let added = &new[common..];
        if common == session.last_visible.len() {
            self.render.enqueue(added, token, token, now);
        } else {
            // retraction: drop whatever was waiting and redraw everything
            self.render.clear();
            effects.push(SessionEffect::Replace { text: new.clone() });
            if speech_enabled {
                self.segmenter.retract(session.last_visible.len() - common);
            }
        }
        if speech_enabled {
            effects.extend(
                self.segmenter
                    .feed(added)
                    .into_iter()
                    .map(|text| SessionEffect::Sentence { text }),
            );
        }
        session.last_visible = new;
        effects
    }

    /// Flush buffered render text if its deadline has passed.
    pub fn on_render_deadline(&mut self, now: Instant) -> Vec<SessionEffect> {
        if !self.render.deadline().is_some_and(|d| d <= now) {
            return Vec::new();
        }
        let Some(session) = self.active.as_ref() else {
            self.render.clear();
            return Vec::new();
        };
        self.render
            .flush(session.token, session.surface_ready, now)
            .map(|text| vec![SessionEffect::Append { text }])
            .unwrap_or_default()
    }

    /// Finish the session: flush buffers, append the reply to the speaker's
    /// timeline, or show the placeholder when nothing was visible.
    pub fn on_complete(
        &mut self,
        token: GenerationToken,
        speech_enabled: bool,
        timelines: &mut SpeakerMap<Timeline>,
    ) -> Vec<SessionEffect> {
        if !self.is_active(token) {
            return Vec::new();
        }
        let Some(session) = self.active.take() else {
            return Vec::new();
        };
        let mut effects = Vec::new();

        if session.reasoning_active {
            effects.push(SessionEffect::Reasoning { active: false });
        }
        if let Some(text) = self.render.flush_now(token) {
            effects.push(SessionEffect::Append { text });
        }
        if speech_enabled {
            if let Some(text) = self.segmenter.flush() {
                effects.push(SessionEffect::Sentence { text });
            }
        }
        self.segmenter.clear();

        let text = session.last_visible.trim();
        if text.is_empty() {
            if !session.surface_ready {
                effects.push(SessionEffect::SurfaceCreated {
                    speaker: session.speaker,
                });
            }
            effects.push(SessionEffect::Replace {
                text: self.no_response.clone(),
            });
            effects.push(SessionEffect::Completed {
                speaker: session.speaker,
                text: None,
            });
        } else {
            timelines[session.speaker].push_assistant(text);
            effects.push(SessionEffect::Completed {
                speaker: session.speaker,
                text: Some(text.to_string()),
            });
        }
        tracing::debug!(%token, speaker = %session.speaker, "stream session completed");
        effects
    }

    /// Tear down after a transport or stream failure. Nothing is appended.
    pub fn on_error(&mut self, token: GenerationToken, message: &str) -> Vec<SessionEffect> {
        let Some(session) = self.take_if_active(token) else {
            return Vec::new();
        };
        tracing::debug!(%token, speaker = %session.speaker, error = message, "stream session failed");
        let mut effects = Vec::new();
        if session.reasoning_active {
            effects.push(SessionEffect::Reasoning { active: false });
        }
        effects.push(SessionEffect::Failed {
            speaker: session.speaker,
            message: message.to_string(),
        });
        effects
    }

    /// Cancel the session and invalidate its token.
    pub fn cancel(&mut self, token: GenerationToken) -> Vec<SessionEffect> {
        let Some(session) = self.take_if_active(token) else {
            return Vec::new();
        };
        self.generation.advance();
        tracing::debug!(%token, speaker = %session.speaker, "stream session cancelled");
        let mut effects = Vec::new();
        if session.reasoning_active {
            effects.push(SessionEffect::Reasoning { active: false });
        }
        effects.push(SessionEffect::Cancelled {
            speaker: session.speaker,
        });
        effects
    }

    fn take_if_active(&mut self, token: GenerationToken) -> Option<StreamSession> {
        if !self.is_active(token) {
            return None;
        }
        self.render.clear();
        self.segmenter.clear();
        self.active.take()
    }
}

/// Length in bytes of the longest common prefix, on a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_ai::Role;
    use std::time::Duration;

    fn controller() -> SessionController {
        SessionController::new(
            ReasoningFilter::default(),
            RenderScheduler::new(Duration::from_millis(50)),
        )
    }

    fn timelines() -> SpeakerMap<Timeline> {
        SpeakerMap::from_fn(|s| Timeline::new(format!("{s} system")))
    }

    fn appended(effects: &[SessionEffect]) -> String {
        effects
            .iter()
            .filter_map(|e| match e {
                SessionEffect::Append { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len("abc", "abd"), 2);
        assert_eq!(common_prefix_len("ab", "abc"), 2);
        assert_eq!(common_prefix_len("日本", "日曜"), 3);
        assert_eq!(common_prefix_len("", "x"), 0);
    }

    #[test]
    fn test_end_to_end_reasoning_hidden() {
        let mut c = controller();
        let mut tl = timelines();
        let t = c.start(Speaker::Base);
        let now = Instant::now();
        let mut effects = Vec::new();
        for delta in ["<think>", "reasoning", "</think>"] {
            let step = c.on_delta(t, delta, false, now);
            assert!(
                !step.iter().any(|e| matches!(
                    e,
                    SessionEffect::Append { .. } | SessionEffect::SurfaceCreated { .. }
                )),
                "visible output before close marker: {step:?}"
            );
            effects.extend(step);
        }
        assert_eq!(c.render_deadline(), None);
        assert!(effects.contains(&SessionEffect::Reasoning { active: true }));
        assert!(effects.contains(&SessionEffect::Reasoning { active: false }));

        effects.extend(c.on_delta(t, "Hi", false, now));
        effects.extend(c.on_delta(t, " there.", false, now));
        effects.extend(c.on_complete(t, false, &mut tl));

        assert_eq!(appended(&effects), "Hi there.");
        assert!(effects.contains(&SessionEffect::Completed {
            speaker: Speaker::Base,
            text: Some("Hi there.".into())
        }));
        let assistants: Vec<_> = tl[Speaker::Base]
            .messages()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(assistants.len(), 1);
        assert_eq!(assistants[0].content, "Hi there.");
        assert_eq!(tl[Speaker::Chatter].len(), 1);
    }

    #[test]
    fn test_stale_tokens_are_ignored() {
        let mut c = controller();
        let mut tl = timelines();
        let old = c.start(Speaker::Base);
        let new = c.start(Speaker::Chatter);
        let now = Instant::now();
        c.on_delta(new, "fresh", false, now);
        assert!(c.on_delta(old, "late", false, now).is_empty());
        assert!(c.on_complete(old, false, &mut tl).is_empty());
        assert!(c.on_error(old, "boom").is_empty());
        assert!(c.cancel(old).is_empty());
        assert!(c.is_active(new));
        let active = c.active().unwrap();
        assert_eq!(active.raw(), "fresh");
        assert_eq!(active.visible(), "fresh");
        assert_eq!(tl[Speaker::Base].len(), 1);
    }

    #[test]
    fn test_cancel_advances_generation() {
        let mut c = controller();
        let t = c.start(Speaker::Base);
        c.on_delta(t, "partial", false, Instant::now());
        let effects = c.cancel(t);
        assert_eq!(
            effects,
            vec![SessionEffect::Cancelled {
                speaker: Speaker::Base
            }]
        );
        assert!(c.generation.current() > t);
        assert!(c.active().is_none());
        assert!(c.cancel(t).is_empty());
    }

    #[test]
    fn test_error_appends_nothing() {
        let mut c = controller();
        let mut tl = timelines();
        let t = c.start(Speaker::Chatter);
        c.on_delta(t, "<think>abc", false, Instant::now());
        let effects = c.on_error(t, "HTTP error: 500");
        assert_eq!(
            effects,
            vec![
                SessionEffect::Reasoning { active: false },
                SessionEffect::Failed {
                    speaker: Speaker::Chatter,
                    message: "HTTP error: 500".into()
                }
            ]
        );
        assert!(c.on_complete(t, false, &mut tl).is_empty());
        assert_eq!(tl[Speaker::Chatter].len(), 1);
    }

    #[test]
    fn test_empty_reply_shows_placeholder() {
        let mut c = controller().with_no_response_text("(nothing)");
        let mut tl = timelines();
        let t = c.start(Speaker::Base);
        c.on_delta(t, "<think>only thoughts</think>\n\n", false, Instant::now());
        let effects = c.on_complete(t, false, &mut tl);
        assert!(effects.contains(&SessionEffect::Replace {
            text: "(nothing)".into()
        }));
        assert!(effects.contains(&SessionEffect::Completed {
            speaker: Speaker::Base,
            text: None
        }));
        assert_eq!(tl[Speaker::Base].len(), 1);
    }

    #[test]
    fn test_sentences_only_when_speech_enabled() {
        let mut c = controller();
        let mut tl = timelines();
        let t = c.start(Speaker::Base);
        let now = Instant::now();
        let effects = c.on_delta(t, "One. Two", true, now);
        assert!(effects.contains(&SessionEffect::Sentence { text: "One.".into() }));
        let effects = c.on_complete(t, true, &mut tl);
        assert!(effects.contains(&SessionEffect::Sentence { text: "Two".into() }));

        let t = c.start(Speaker::Base);
        let effects = c.on_delta(t, "Three. Four.", false, now);
        assert!(!effects.iter().any(|e| matches!(e, SessionEffect::Sentence { .. })));
    }

    #[test]
    fn test_partial_marker_held_back_then_shown() {
        let mut c = controller();
        let t = c.start(Speaker::Base);
        let now = Instant::now();
        c.on_delta(t, "Hello <", true, now);
        assert_eq!(c.active().unwrap().visible(), "Hello ");
        // "<b" is not a marker prefix, so "<" is released
        let effects = c.on_delta(t, "b", true, now);
        assert!(!effects.iter().any(|e| matches!(e, SessionEffect::Replace { .. })));
        assert_eq!(c.active().unwrap().visible(), "Hello <b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_flush_after_interval() {
        let mut c = controller();
        let t = c.start(Speaker::Base);
        let start = Instant::now();
        let effects = c.on_delta(t, "Hel", false, start);
        assert!(effects.contains(&SessionEffect::SurfaceCreated {
            speaker: Speaker::Base
        }));
        c.on_delta(t, "lo", false, start);
        assert!(c.on_render_deadline(start).is_empty());

        tokio::time::advance(Duration::from_millis(50)).await;
        let effects = c.on_render_deadline(Instant::now());
        assert_eq!(appended(&effects), "Hello");
        assert_eq!(c.render_deadline(), None);
    }
}
