//! /chatter, /speech, /autovoice and /search - show or flip a mode

use super::CommandResult;
use crate::utils::{on_off, parse_toggle};
use duet_engine::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Chatter,
    Speech,
    AutoVoiceInput,
    WebSearch,
}

impl Setting {
    pub fn name(self) -> &'static str {
        match self {
            Setting::Chatter => "chatter",
            Setting::Speech => "speech",
            Setting::AutoVoiceInput => "autovoice",
            Setting::WebSearch => "search",
        }
    }

    fn current(self, state: &Snapshot) -> bool {
        match self {
            Setting::Chatter => state.chatter_enabled,
            Setting::Speech => state.speech_enabled,
            Setting::AutoVoiceInput => state.auto_voice_input,
            Setting::WebSearch => state.web_search,
        }
    }
}

pub struct ToggleCommand;

impl ToggleCommand {
    /// No argument flips the setting.
    pub fn execute(setting: Setting, args: &str, state: &Snapshot) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Set(setting, !setting.current(state));
        }
        match parse_toggle(args) {
            Some(enabled) => CommandResult::Set(setting, enabled),
            None => CommandResult::Message(format!(
                "Usage: /{} [on|off] (currently {})",
                setting.name(),
                on_off(setting.current(state))
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::state;

    #[test]
    fn test_no_argument_flips() {
        let state = state();
        assert_eq!(
            ToggleCommand::execute(Setting::Chatter, "", &state),
            CommandResult::Set(Setting::Chatter, true)
        );
        assert_eq!(
            ToggleCommand::execute(Setting::Speech, "", &state),
            CommandResult::Set(Setting::Speech, false)
        );
    }

    #[test]
    fn test_explicit_value() {
        assert_eq!(
            ToggleCommand::execute(Setting::AutoVoiceInput, "on", &state()),
            CommandResult::Set(Setting::AutoVoiceInput, true)
        );
        assert!(matches!(
            ToggleCommand::execute(Setting::Chatter, "sideways", &state()),
            CommandResult::Message(_)
        ));
    }
}
