//! /interval command - show or set the pause between chatter turns

use std::time::Duration;

use super::CommandResult;
use duet_engine::Snapshot;

pub struct IntervalCommand;

impl IntervalCommand {
    /// Seconds; `0` stops the timer without turning chatter off.
    pub fn execute(args: &str, state: &Snapshot) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(format!(
                "Chatter interval: {}s",
                state.chatter_interval.as_secs()
            ));
        }
        match args.trim_end_matches('s').parse::<u64>() {
            Ok(secs) => CommandResult::ChatterInterval(Duration::from_secs(secs)),
            Err(_) => CommandResult::Message("Usage: /interval [seconds]".to_string()),
        }
    }
}
