//! /say command - request a turn from one speaker

use super::CommandResult;
use duet_engine::Speaker;

pub struct SayCommand;

impl SayCommand {
    pub fn execute(args: &str) -> CommandResult {
        let mut parts = args.splitn(2, ' ');
        let target = parts.next().unwrap_or_default();
        match target.parse::<Speaker>() {
            Ok(speaker) => CommandResult::Say {
                speaker,
                prompt: parts
                    .next()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from),
            },
            Err(_) => CommandResult::Message("Usage: /say <base|chatter> [text]".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_say_with_prompt() {
        assert_eq!(
            SayCommand::execute("chatter   tell me more "),
            CommandResult::Say {
                speaker: Speaker::Chatter,
                prompt: Some("tell me more".into())
            }
        );
        assert_eq!(
            SayCommand::execute("base"),
            CommandResult::Say {
                speaker: Speaker::Base,
                prompt: None
            }
        );
    }

    #[test]
    fn test_say_requires_speaker() {
        assert!(matches!(SayCommand::execute(""), CommandResult::Message(_)));
        assert!(matches!(SayCommand::execute("narrator hi"), CommandResult::Message(_)));
    }
}
