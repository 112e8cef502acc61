//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use duet_ai::WebSearch;
use duet_engine::{
    ChatterConfig, EngineConfig, MarkerPair, SpeakerMap, SpeakerProfile, VoiceSettings,
    reasoning::default_markers, session::DEFAULT_NO_RESPONSE, timeline::DEFAULT_NAME_TEMPLATE,
};

/// Configuration for duet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ollama server URL
    pub base_url: String,
    /// Stream replies token by token
    pub streaming: bool,
    /// Speak replies aloud
    pub speech: bool,
    /// External synthesizer command, e.g. `espeak-ng -v {lang} --stdin`
    pub speech_command: Option<String>,
    pub auto_voice_input: bool,
    /// Start with chatter mode on
    pub chatter: bool,
    /// Search the web before answering typed input
    pub web_search: bool,
    pub web_search_url: String,
    /// Brave Search subscription token; search stays unavailable without it
    pub web_search_api_key: Option<String>,
    pub history_limit: usize,
    pub chatter_interval_secs: u64,
    pub busy_backoff_ms: u64,
    pub render_interval_ms: u64,
    pub warmup_ms: u64,
    pub continue_prompt: String,
    pub no_response_text: String,
    pub name_template: String,
    /// `[open, close]` pairs
    pub reasoning_markers: Vec<[String; 2]>,
    pub speakers: Speakers,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Speakers {
    pub base: SpeakerConfig,
    pub chatter: SpeakerConfig,
}

/// One speaker's settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    pub name: Option<String>,
    /// Model name; `default` picks the first installed model
    pub model: String,
    pub system_prompt: String,
    pub language: String,
    pub rate: f32,
    pub pitch: f32,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        let voice = VoiceSettings::default();
        Self {
            name: None,
            model: "default".to_string(),
            system_prompt: String::new(),
            language: voice.language,
            rate: voice.rate,
            pitch: voice.pitch,
        }
    }
}

impl SpeakerConfig {
    fn profile(&self, fallback_name: &str) -> SpeakerProfile {
        SpeakerProfile {
            name: self
                .name
                .clone()
                .unwrap_or_else(|| fallback_name.to_string()),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            voice: VoiceSettings {
                language: self.language.clone(),
                rate: self.rate,
                pitch: self.pitch,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let chatter = ChatterConfig::default();
        Self {
            base_url: duet_ai::providers::ollama::DEFAULT_BASE_URL.to_string(),
            streaming: true,
            speech: false,
            speech_command: None,
            auto_voice_input: false,
            chatter: false,
            web_search: false,
            web_search_url: duet_ai::search::DEFAULT_SEARCH_URL.to_string(),
            web_search_api_key: None,
            history_limit: 10,
            chatter_interval_secs: chatter.interval.as_secs(),
            busy_backoff_ms: chatter.busy_backoff.as_millis() as u64,
            render_interval_ms: 50,
            warmup_ms: 120,
            continue_prompt: chatter.continue_prompt,
            no_response_text: DEFAULT_NO_RESPONSE.to_string(),
            name_template: DEFAULT_NAME_TEMPLATE.to_string(),
            reasoning_markers: default_markers()
                .into_iter()
                .map(|m| [m.open, m.close])
                .collect(),
            speakers: Speakers::default(),
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("duet")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DUET_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location. Problems are reported and
    /// defaults used instead.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e:#}");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }

    /// Search client, if an API key is configured.
    pub fn search_client(&self) -> anyhow::Result<Option<WebSearch>> {
        let Some(key) = self.web_search_api_key.as_deref() else {
            return Ok(None);
        };
        Ok(Some(WebSearch::new(self.web_search_url.as_str(), key)?))
    }

    /// Engine settings described by this config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            profiles: SpeakerMap::new(
                self.speakers.base.profile("Base"),
                self.speakers.chatter.profile("Chatter"),
            ),
            history_limit: self.history_limit,
            streaming: self.streaming,
            speech_enabled: self.speech,
            auto_voice_input: self.auto_voice_input,
            chatter_enabled: self.chatter,
            web_search: self.web_search,
            chatter: ChatterConfig {
                interval: Duration::from_secs(self.chatter_interval_secs),
                busy_backoff: Duration::from_millis(self.busy_backoff_ms),
                continue_prompt: self.continue_prompt.clone(),
            },
            render_interval: Duration::from_millis(self.render_interval_ms),
            warmup: Duration::from_millis(self.warmup_ms),
            markers: self
                .reasoning_markers
                .iter()
                .map(|[open, close]| MarkerPair::new(open.as_str(), close.as_str()))
                .collect(),
            name_template: self.name_template.clone(),
            no_response_text: self.no_response_text.clone(),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# duet configuration file
# Place at ~/.config/duet/config.toml (Linux), or set DUET_CONFIG_PATH

base_url = "http://localhost:11434"
streaming = true

# Speak replies through an external command. The text is written to its stdin;
# {lang}, {rate} and {pitch} are replaced with the speaker's voice settings.
speech = false
# speech_command = "espeak-ng -v {lang} --stdin"

# Let the two speakers talk to each other
chatter = false
chatter_interval_secs = 30
continue_prompt = "Keep going."

history_limit = 10

# Look things up with Brave Search before answering typed input
web_search = false
# web_search_api_key = "..."

[speakers.base]
name = "Base"
model = "default"
system_prompt = ""
language = "ja-JP"

[speakers.chatter]
name = "Chatter"
model = "default"
system_prompt = ""
language = "ja-JP"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_engine::Speaker;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
chatter = true
chatter_interval_secs = 5

[speakers.chatter]
name = "Aoi"
model = "llama3"
"#,
        )
        .expect("write");

        let config = Config::load_from(&path).expect("load");
        assert!(config.chatter);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.speakers.base.model, "default");

        let engine = config.engine_config();
        assert_eq!(engine.chatter.interval, Duration::from_secs(5));
        assert_eq!(engine.profiles[Speaker::Chatter].name, "Aoi");
        assert_eq!(engine.profiles[Speaker::Chatter].model, "llama3");
        assert_eq!(engine.profiles[Speaker::Base].name, "Base");
        assert_eq!(engine.markers.len(), default_markers().len());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.speech_command = Some("espeak-ng --stdin".into());
        config.reasoning_markers = vec![["[[".into(), "]]".into()]];
        config.save_to(&path).expect("save");

        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded.speech_command.as_deref(), Some("espeak-ng --stdin"));
        assert_eq!(loaded.engine_config().markers, vec![MarkerPair::new("[[", "]]")]);
    }

    #[test]
    fn test_web_search_keys() {
        let config: Config = toml::from_str("web_search = true").expect("parse");
        assert!(config.engine_config().web_search);
        assert_eq!(config.web_search_url, duet_ai::search::DEFAULT_SEARCH_URL);
        assert!(config.search_client().expect("no key").is_none());

        let config: Config = toml::from_str(
            r#"
web_search_url = "http://localhost:9000/search"
web_search_api_key = "secret"
"#,
        )
        .expect("parse");
        assert!(!config.engine_config().web_search);
        assert!(config.search_client().expect("client").is_some());

        let config: Config =
            toml::from_str("web_search_url = \"ftp://x\"\nweb_search_api_key = \"k\"").expect("parse");
        assert!(config.search_client().is_err());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "history_limit = \"many\"").expect("write");
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).expect("parse");
        assert_eq!(config.speakers.chatter.name.as_deref(), Some("Chatter"));
    }
}
