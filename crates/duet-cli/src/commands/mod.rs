//! Slash commands for interactive mode

mod history;
mod interval;
mod limit;
mod say;
mod toggle;

pub use history::HistoryCommand;
pub use interval::IntervalCommand;
pub use limit::LimitCommand;
pub use say::SayCommand;
pub use toggle::{Setting, ToggleCommand};

use std::time::Duration;

use duet_engine::{Snapshot, Speaker};

/// Result of executing a slash command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Reset both timelines
    Clear,
    /// Stop the current reply and speech
    Cancel,
    /// Turn a setting on or off
    Set(Setting, bool),
    /// Trailing messages sent with each request
    HistoryLimit(usize),
    /// Pause before each automatic turn
    ChatterInterval(Duration),
    /// Request a turn from a speaker
    Say {
        speaker: Speaker,
        prompt: Option<String>,
    },
    /// Show a message to the user
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command against the current engine state
pub fn execute_command(input: &str, state: &Snapshot) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or_default().to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "chatter" => ToggleCommand::execute(Setting::Chatter, args, state),

        "speech" => ToggleCommand::execute(Setting::Speech, args, state),

        "autovoice" => ToggleCommand::execute(Setting::AutoVoiceInput, args, state),

        "search" => ToggleCommand::execute(Setting::WebSearch, args, state),

        "limit" => LimitCommand::execute(args, state),

        "interval" => IntervalCommand::execute(args, state),

        "say" => SayCommand::execute(args),

        "cancel" | "stop" => CommandResult::Cancel,

        "history" => HistoryCommand::execute(args, state),

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?              Show this help message
  /chatter [on|off]          Let the two speakers talk to each other
  /speech [on|off]           Speak replies aloud
  /autovoice [on|off]        Ask for voice input after each reply
  /search [on|off]           Search the web before answering your input
  /limit [messages]          Show or set how many messages each request carries
  /interval [seconds]        Show or set the pause between chatter turns
  /say <base|chatter> [text] Ask a speaker for a turn, optionally with a prompt
  /cancel                    Stop the current reply and speech
  /history [base|chatter]    Show a speaker's timeline
  /clear, /c                 Clear both conversations
  /quit, /exit, /q           Exit duet

Anything else is sent to the base speaker."#
        .to_string()
}
