//! /limit command - show or set how many messages each request carries

use super::CommandResult;
use duet_engine::Snapshot;

pub struct LimitCommand;

impl LimitCommand {
    pub fn execute(args: &str, state: &Snapshot) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(format!(
                "History limit: {} messages",
                state.history_limit
            ));
        }
        match args.parse::<usize>() {
            Ok(limit) => CommandResult::HistoryLimit(limit),
            Err(_) => CommandResult::Message("Usage: /limit [messages]".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::state;

    #[test]
    fn test_limit_shows_current() {
        let CommandResult::Message(text) = LimitCommand::execute("", &state()) else {
            panic!("expected a message");
        };
        assert_eq!(text, "History limit: 10 messages");
    }

    #[test]
    fn test_limit_sets_value() {
        assert_eq!(
            LimitCommand::execute("4", &state()),
            CommandResult::HistoryLimit(4)
        );
        assert!(matches!(
            LimitCommand::execute("-1", &state()),
            CommandResult::Message(_)
        ));
    }
}
