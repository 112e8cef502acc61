//! duet - two model speakers in one console conversation

mod commands;
mod config;
mod session;
mod speech;
mod ui;
mod utils;

use anyhow::Context;
use clap::Parser;
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use commands::{CommandResult, Setting};
use duet_ai::{ChatProvider, OllamaProvider};
use duet_engine::{
    Engine, EngineEvent, EngineHandle, ProviderTransport, SpeakerMap, SpeechEngine,
    WebSearchAugmenter,
};
use session::Transcript;
use speech::{CommandSpeech, SilentSpeech, SpeechCallback};
use ui::Console;
use utils::on_off;

/// duet - let two local models talk, with you or with each other
#[derive(Parser, Debug)]
#[command(name = "duet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model for the base speaker (also the chatter speaker unless --chatter-model is set)
    #[arg(short, long)]
    model: Option<String>,

    /// Model for the chatter speaker
    #[arg(long)]
    chatter_model: Option<String>,

    /// Ollama server URL
    #[arg(long)]
    base_url: Option<String>,

    /// Speak replies aloud
    #[arg(long, overrides_with = "no_speech")]
    speech: bool,

    /// Do not speak replies
    #[arg(long)]
    no_speech: bool,

    /// Start with the two speakers talking to each other
    #[arg(long)]
    chatter: bool,

    /// Wait for whole replies instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// Search the web before answering typed input
    #[arg(long)]
    web_search: bool,

    /// Number of trailing messages sent with each request
    #[arg(long)]
    history_limit: Option<usize>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// List installed models and exit
    #[arg(long)]
    list_models: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Do not write a transcript
    #[arg(long)]
    no_transcript: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("duet=debug,duet_engine=debug,duet_ai=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Merge CLI args into the config (CLI takes precedence)
fn apply_args(cfg: &mut config::Config, args: &Args) {
    if let Some(ref model) = args.model {
        cfg.speakers.base.model = model.clone();
        if args.chatter_model.is_none() {
            cfg.speakers.chatter.model = model.clone();
        }
    }
    if let Some(ref model) = args.chatter_model {
        cfg.speakers.chatter.model = model.clone();
    }
    if let Some(ref url) = args.base_url {
        cfg.base_url = url.clone();
    }
    if args.speech {
        cfg.speech = true;
    }
    if args.no_speech {
        cfg.speech = false;
    }
    if args.chatter {
        cfg.chatter = true;
    }
    if args.no_stream {
        cfg.streaming = false;
    }
    if args.web_search {
        cfg.web_search = true;
    }
    if let Some(limit) = args.history_limit {
        cfg.history_limit = limit;
    }
}

/// Replace `default` model names with the first installed model.
async fn resolve_models(provider: &OllamaProvider, cfg: &mut config::Config) -> anyhow::Result<()> {
    let speakers = [&mut cfg.speakers.base, &mut cfg.speakers.chatter];
    if speakers.iter().all(|s| s.model != "default") {
        return Ok(());
    }
    let models = provider
        .list_models()
        .await
        .with_context(|| format!("could not list models at {}", provider.base_url()))?;
    let first = models
        .first()
        .map(|m| m.name.clone())
        .with_context(|| format!("no models installed at {}", provider.base_url()))?;
    for speaker in speakers {
        if speaker.model == "default" {
            speaker.model = first.clone();
        }
    }
    Ok(())
}

fn build_speech(command: Option<&str>, handle: EngineHandle) -> Box<dyn SpeechEngine> {
    let on_event: SpeechCallback = Arc::new(move |event| {
        let _ = handle.speech_event(event);
    });
    if let Some(command) = command {
        match CommandSpeech::new(command, on_event.clone()) {
            Ok(speech) => return Box::new(speech),
            Err(e) => tracing::warn!(error = %e, "speech command unusable, speech will be silent"),
        }
    }
    Box::new(SilentSpeech::new(on_event))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut cfg = config::Config::load();
    apply_args(&mut cfg, &args);
    let provider = OllamaProvider::new(cfg.base_url.clone())?;

    if args.list_models {
        let models = provider
            .list_models()
            .await
            .with_context(|| format!("could not list models at {}", provider.base_url()))?;
        for model in models {
            println!("{}", model.name);
        }
        return Ok(());
    }

    resolve_models(&provider, &mut cfg).await?;
    let engine_config = cfg.engine_config();
    let search = cfg.search_client()?;
    let transport = Arc::new(ProviderTransport::new(provider.clone()));
    let speech_command = cfg.speech_command.clone();
    let mut engine = Engine::new(engine_config, transport, |handle| {
        build_speech(speech_command.as_deref(), handle)
    });
    match search {
        Some(search) => {
            engine = engine.with_augmenter(Arc::new(WebSearchAugmenter::new(provider, search)));
        }
        None if cfg.web_search => {
            tracing::warn!("web search enabled but web_search_api_key is not set");
        }
        None => {}
    }
    let (handle, task) = engine.spawn();

    let transcript = if args.no_transcript {
        None
    } else {
        match Transcript::create(
            &Transcript::transcripts_dir(),
            &cfg.speakers.base.model,
            &cfg.speakers.chatter.model,
        ) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(error = %e, "transcript disabled");
                None
            }
        }
    };

    let result = match args.command {
        Some(ref prompt) => run_command(&handle, prompt, transcript).await,
        None => run_interactive(&handle, transcript).await,
    };

    let _ = handle.shutdown();
    let _ = task.await;
    result
}

/// Records completed turns and user input in the transcript.
struct Recorder {
    transcript: Option<Transcript>,
    names: SpeakerMap<String>,
}

impl Recorder {
    async fn new(handle: &EngineHandle, transcript: Option<Transcript>) -> anyhow::Result<Self> {
        let state = handle.snapshot().await?;
        Ok(Self {
            transcript,
            names: state.profiles.map(|_, p| p.name.clone()),
        })
    }

    fn user(&mut self, text: &str) {
        if let Some(t) = self.transcript.as_mut() {
            if let Err(e) = t.append_user(text) {
                tracing::warn!(error = %e, "failed to write transcript");
            }
        }
    }

    fn event(&mut self, event: &EngineEvent) {
        let EngineEvent::TurnComplete { speaker, text } = event else {
            return;
        };
        if let Some(t) = self.transcript.as_mut() {
            if let Err(e) = t.append_turn(*speaker, &self.names[*speaker], text) {
                tracing::warn!(error = %e, "failed to write transcript");
            }
        }
    }
}

async fn run_command(
    handle: &EngineHandle,
    prompt: &str,
    transcript: Option<Transcript>,
) -> anyhow::Result<()> {
    let mut recorder = Recorder::new(handle, transcript).await?;
    let mut console = Console::new(std::io::stdout());
    let mut events = handle.subscribe();

    recorder.user(prompt);
    handle.submit(prompt)?;

    let mut waiting_for_speech = false;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "console fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        recorder.event(&event);
        console.handle(&event)?;
        match event {
            EngineEvent::ProcessingChanged { processing: false } => {
                if !handle.snapshot().await?.speech_pending {
                    break;
                }
                waiting_for_speech = true;
            }
            EngineEvent::SpeechIdle if waiting_for_speech => break,
            _ => {}
        }
    }
    Ok(())
}

async fn run_interactive(
    handle: &EngineHandle,
    transcript: Option<Transcript>,
) -> anyhow::Result<()> {
    let mut recorder = Recorder::new(handle, transcript).await?;
    let mut console = Console::new(std::io::stdout());
    let mut events = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Show minimal startup info (only if TTY)
    if std::io::stderr().is_terminal() {
        let state = handle.snapshot().await?;
        eprintln!(
            "duet ({}: {}, {}: {}) chatter {}, speech {}, search {}",
            state.profiles.base.name,
            state.profiles.base.model,
            state.profiles.chatter.name,
            state.profiles.chatter.model,
            on_off(state.chatter_enabled),
            on_off(state.speech_enabled),
            on_off(state.web_search),
        );
        if let Some(t) = recorder.transcript.as_ref() {
            eprintln!("transcript: {}", t.path().display());
        }
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                // EOF
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.starts_with('/') {
                    let state = handle.snapshot().await?;
                    if let Some(result) = commands::execute_command(input, &state) {
                        if !apply_command(handle, &mut console, result)? {
                            break;
                        }
                    }
                    continue;
                }
                recorder.user(input);
                handle.submit(input)?;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    recorder.event(&event);
                    console.handle(&event)?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "console fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Apply a slash command. Returns `false` when the user asked to exit.
fn apply_command(
    handle: &EngineHandle,
    console: &mut Console<std::io::Stdout>,
    result: CommandResult,
) -> anyhow::Result<bool> {
    match result {
        CommandResult::Clear => handle.clear()?,
        CommandResult::Cancel => handle.cancel()?,
        CommandResult::Set(setting, enabled) => {
            match setting {
                Setting::Chatter => handle.set_chatter(enabled)?,
                Setting::Speech => handle.set_speech(enabled)?,
                Setting::AutoVoiceInput => handle.set_auto_voice_input(enabled)?,
                Setting::WebSearch => handle.set_web_search(enabled)?,
            }
            console.notice(&format!("{} {}", setting.name(), on_off(enabled)))?;
        }
        CommandResult::HistoryLimit(limit) => {
            handle.set_history_limit(limit)?;
            console.notice(&format!("history limit {limit}"))?;
        }
        CommandResult::ChatterInterval(interval) => {
            handle.set_chatter_interval(interval)?;
            console.notice(&format!("chatter interval {}s", interval.as_secs()))?;
        }
        CommandResult::Say { speaker, prompt } => handle.send_as(speaker, prompt)?,
        CommandResult::Message(msg) => console.notice(&msg)?,
        CommandResult::Exit => return Ok(false),
        CommandResult::Unknown(cmd) => {
            console.notice(&format!("Unknown command: /{}", cmd))?;
            console.notice("Type /help for available commands.")?;
        }
    }
    Ok(true)
}
