//! /history command - show a speaker's timeline

use super::CommandResult;
use crate::utils::truncate_chars;
use duet_engine::{Snapshot, Speaker};

pub struct HistoryCommand;

impl HistoryCommand {
    pub fn execute(args: &str, state: &Snapshot) -> CommandResult {
        let speaker = if args.is_empty() {
            Speaker::Base
        } else {
            match args.parse::<Speaker>() {
                Ok(speaker) => speaker,
                Err(_) => {
                    return CommandResult::Message(
                        "Usage: /history [base|chatter]".to_string(),
                    );
                }
            }
        };
        CommandResult::Message(format_history(speaker, state))
    }
}

fn format_history(speaker: Speaker, state: &Snapshot) -> String {
    let profile = &state.profiles[speaker];
    let messages = &state.timelines[speaker];
    let mut output = format!(
        "{} ({}) - {} messages, last {} sent:\n",
        profile.name,
        profile.model,
        messages.len(),
        state.history_limit
    );
    for (i, message) in messages.iter().enumerate() {
        let text = truncate_chars(&message.content.replace('\n', " "), 100);
        output.push_str(&format!("  {:>3} {:<9} {}\n", i, message.role.as_str(), text));
    }
    output.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::state;
    use duet_ai::ChatMessage;

    #[test]
    fn test_history_lists_messages() {
        let mut state = state();
        state.timelines.chatter = vec![
            ChatMessage::system("Your name is Aoi."),
            ChatMessage::user("Hello from base."),
        ];
        let CommandResult::Message(text) = HistoryCommand::execute("chatter", &state) else {
            panic!("expected a message");
        };
        assert!(text.starts_with("Aoi (llama3) - 2 messages"));
        assert!(text.contains("user"));
        assert!(text.contains("Hello from base."));
    }

    #[test]
    fn test_history_rejects_unknown_speaker() {
        let CommandResult::Message(text) = HistoryCommand::execute("nobody", &state()) else {
            panic!("expected a message");
        };
        assert!(text.starts_with("Usage"));
    }
}
