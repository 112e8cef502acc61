//! Speakers and their conversation timelines.

use std::ops::{Index, IndexMut};

use duet_ai::ChatMessage;
use serde::{Deserialize, Serialize};

/// One of the two conversational agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Base,
    Chatter,
}

impl Speaker {
    pub const ALL: [Speaker; 2] = [Speaker::Base, Speaker::Chatter];

    /// The counterpart speaker.
    pub fn other(self) -> Speaker {
        match self {
            Speaker::Base => Speaker::Chatter,
            Speaker::Chatter => Speaker::Base,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Base => "base",
            Speaker::Chatter => "chatter",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Speaker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" | "a" => Ok(Speaker::Base),
            "chatter" | "b" => Ok(Speaker::Chatter),
            other => Err(format!("unknown speaker: {other}")),
        }
    }
}

/// A value per speaker, indexed by [`Speaker`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeakerMap<T> {
    pub base: T,
    pub chatter: T,
}

impl<T> SpeakerMap<T> {
    pub fn new(base: T, chatter: T) -> Self {
        Self { base, chatter }
    }

    pub fn from_fn(mut f: impl FnMut(Speaker) -> T) -> Self {
        Self {
            base: f(Speaker::Base),
            chatter: f(Speaker::Chatter),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Speaker, &T) -> U) -> SpeakerMap<U> {
        SpeakerMap {
            base: f(Speaker::Base, &self.base),
            chatter: f(Speaker::Chatter, &self.chatter),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Speaker, &T)> {
        [(Speaker::Base, &self.base), (Speaker::Chatter, &self.chatter)].into_iter()
    }
}

impl<T> Index<Speaker> for SpeakerMap<T> {
    type Output = T;

    fn index(&self, speaker: Speaker) -> &T {
        match speaker {
            Speaker::Base => &self.base,
            Speaker::Chatter => &self.chatter,
        }
    }
}

impl<T> IndexMut<Speaker> for SpeakerMap<T> {
    fn index_mut(&mut self, speaker: Speaker) -> &mut T {
        match speaker {
            Speaker::Base => &mut self.base,
            Speaker::Chatter => &mut self.chatter,
        }
    }
}

/// Synthesizer voice parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// BCP-47 language tag, e.g. `ja-JP`
    pub language: String,
    pub rate: f32,
    pub pitch: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language: "ja-JP".to_string(),
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Everything configured for one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    pub voice: VoiceSettings,
}

impl SpeakerProfile {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            system_prompt: String::new(),
            voice: VoiceSettings::default(),
        }
    }
}

/// Default template appended to a system prompt to tell the model its name.
pub const DEFAULT_NAME_TEMPLATE: &str = "Your name is {name}.";

/// Combine a system prompt with the speaker's name.
pub fn build_system_prompt(prompt: &str, name: &str, template: &str) -> String {
    let prompt = prompt.trim();
    let name = name.trim();
    if name.is_empty() {
        return prompt.to_string();
    }
    let suffix = template.replace("{name}", name);
    if prompt.is_empty() {
        suffix
    } else if prompt.contains(&suffix) {
        prompt.to_string()
    } else {
        format!("{prompt}\n{suffix}")
    }
}

/// Ordered message history of one speaker. Index 0 is always the system message.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    messages: Vec<ChatMessage>,
}

impl Timeline {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    /// Rewrite the system message in place.
    pub fn refresh_system_prompt(&mut self, prompt: impl Into<String>) {
        self.messages[0] = ChatMessage::system(prompt);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Drop everything but the system message.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
    }

    /// Messages to send: the system message plus at most `history_limit`
    /// trailing messages.
    pub fn window(&self, history_limit: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(history_limit).max(1);
        let mut out = Vec::with_capacity(1 + self.messages.len() - start);
        out.push(self.messages[0].clone());
        out.extend_from_slice(&self.messages[start..]);
        out
    }
}
