//! Console render surface for engine events

use std::io::{self, Write};

use duet_engine::EngineEvent;

/// Writes replies to a terminal as they stream in.
pub struct Console<W> {
    out: W,
    /// A reply line is open and the cursor sits at its end
    line_open: bool,
    /// Text shown for the open reply
    shown: String,
    speaker_name: String,
    thinking: bool,
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            line_open: false,
            shown: String::new(),
            speaker_name: String::new(),
            thinking: false,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print a line outside any reply.
    pub fn notice(&mut self, message: &str) -> io::Result<()> {
        self.close_line()?;
        writeln!(self.out, "{message}")?;
        self.out.flush()
    }

    fn close_line(&mut self) -> io::Result<()> {
        if self.line_open {
            writeln!(self.out)?;
            self.line_open = false;
        }
        self.thinking = false;
        Ok(())
    }

    pub fn handle(&mut self, event: &EngineEvent) -> io::Result<()> {
        match event {
            EngineEvent::MessageStart { speaker_name, .. } => {
                if self.thinking && !self.line_open {
                    // overwrite the thinking indicator
                    write!(self.out, "\r\x1b[2K")?;
                    self.thinking = false;
                }
                self.close_line()?;
                self.speaker_name = speaker_name.clone();
                self.shown.clear();
                write!(self.out, "{speaker_name}: ")?;
                self.line_open = true;
            }
            EngineEvent::RenderAppend { delta, .. } => {
                if self.line_open {
                    write!(self.out, "{delta}")?;
                    self.shown.push_str(delta);
                }
            }
            EngineEvent::RenderReplace { text, .. } => {
                if self.line_open && text != &self.shown {
                    if self.shown.contains('\n') {
                        writeln!(self.out)?;
                    } else {
                        write!(self.out, "\r\x1b[2K")?;
                    }
                    write!(self.out, "{}: {text}", self.speaker_name)?;
                    self.shown = text.clone();
                }
            }
            EngineEvent::Reasoning { active: true, .. } => {
                if !self.line_open && !self.thinking {
                    write!(self.out, "(thinking...)")?;
                    self.thinking = true;
                }
            }
            EngineEvent::Reasoning { active: false, .. } => {}
            EngineEvent::TurnComplete { .. } => self.close_line()?,
            EngineEvent::Cancelled { .. } => {
                if self.line_open {
                    write!(self.out, " [cancelled]")?;
                }
                self.close_line()?;
            }
            EngineEvent::Error { message, .. } => {
                self.close_line()?;
                writeln!(self.out, "Error: {message}")?;
            }
            EngineEvent::Notice { message } => {
                self.close_line()?;
                writeln!(self.out, "[{message}]")?;
            }
            EngineEvent::ListenRequested => {
                self.close_line()?;
                writeln!(self.out, "[your turn]")?;
            }
            EngineEvent::ProcessingChanged { processing: false } => {
                // a reply that ended without TurnComplete, e.g. the placeholder
                self.close_line()?;
            }
            EngineEvent::SpeakNow { speaker, text } => {
                tracing::debug!(%speaker, text, "speaking");
            }
            EngineEvent::TurnStateChanged { state } => {
                tracing::debug!(?state, "turn state");
            }
            EngineEvent::ProcessingChanged { .. } | EngineEvent::SpeechIdle => {}
        }
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_engine::{GenerationToken, Speaker};

    fn render(events: &[EngineEvent]) -> String {
        let mut console = Console::new(Vec::new());
        for event in events {
            console.handle(event).unwrap();
        }
        String::from_utf8(console.into_inner()).unwrap()
    }

    fn token() -> GenerationToken {
        GenerationToken::default()
    }

    #[test]
    fn test_streamed_reply() {
        let out = render(&[
            EngineEvent::MessageStart {
                speaker: Speaker::Base,
                speaker_name: "Base".into(),
                token: token(),
            },
            EngineEvent::RenderAppend {
                speaker_name: "Base".into(),
                delta: "Hi".into(),
                token: token(),
            },
            EngineEvent::RenderAppend {
                speaker_name: "Base".into(),
                delta: " there.".into(),
                token: token(),
            },
            EngineEvent::TurnComplete {
                speaker: Speaker::Base,
                text: "Hi there.".into(),
            },
        ]);
        assert_eq!(out, "Base: Hi there.\n");
    }

    #[test]
    fn test_thinking_indicator_replaced() {
        let out = render(&[
            EngineEvent::Reasoning {
                active: true,
                token: token(),
            },
            EngineEvent::Reasoning {
                active: false,
                token: token(),
            },
            EngineEvent::MessageStart {
                speaker: Speaker::Chatter,
                speaker_name: "Aoi".into(),
                token: token(),
            },
        ]);
        assert_eq!(out, "(thinking...)\r\x1b[2KAoi: ");
    }

    #[test]
    fn test_placeholder_replaces_empty_surface() {
        let out = render(&[
            EngineEvent::MessageStart {
                speaker: Speaker::Base,
                speaker_name: "Base".into(),
                token: token(),
            },
            EngineEvent::RenderReplace {
                speaker_name: "Base".into(),
                text: "(no response)".into(),
                token: token(),
            },
            EngineEvent::ProcessingChanged { processing: false },
        ]);
        assert_eq!(out, "Base: \r\x1b[2KBase: (no response)\n");
    }

    #[test]
    fn test_error_on_own_line() {
        let out = render(&[
            EngineEvent::MessageStart {
                speaker: Speaker::Base,
                speaker_name: "Base".into(),
                token: token(),
            },
            EngineEvent::Error {
                speaker: Some(Speaker::Base),
                message: "HTTP error: 500".into(),
            },
        ]);
        assert_eq!(out, "Base: \nError: HTTP error: 500\n");
    }
}
