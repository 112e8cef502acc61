//! Speech backends for the console

use std::{process::Stdio, sync::Arc, time::Duration};

use duet_engine::{Error, Result, SpeechEngine, SpeechEvent, UtteranceId, VoiceSettings};
use tokio::{io::AsyncWriteExt, process::Command, sync::mpsc};
use tokio_util::sync::CancellationToken;

/// Receives progress callbacks from a backend.
pub type SpeechCallback = Arc<dyn Fn(SpeechEvent) + Send + Sync>;

enum Job {
    Speak {
        id: UtteranceId,
        text: String,
        voice: VoiceSettings,
    },
    Silence {
        id: UtteranceId,
        duration: Duration,
    },
}

impl Job {
    fn id(&self) -> UtteranceId {
        match self {
            Job::Speak { id, .. } | Job::Silence { id, .. } => *id,
        }
    }
}

/// Speaks by running an external command once per utterance, one at a time.
///
/// The command line is split on whitespace; `{lang}`, `{rate}` and `{pitch}`
/// in any argument are replaced with the current voice settings, and the
/// text is written to the child's stdin.
pub struct CommandSpeech {
    jobs: mpsc::UnboundedSender<(Job, CancellationToken)>,
    voice: VoiceSettings,
    cancel: CancellationToken,
}

impl CommandSpeech {
    /// Start the playback worker. Must be called inside a tokio runtime.
    pub fn new(command: &str, on_event: SpeechCallback) -> Result<Self> {
        let template: Vec<String> = command.split_whitespace().map(String::from).collect();
        if template.is_empty() {
            return Err(Error::Speech("speech command is empty".to_string()));
        }
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_jobs(template, rx, on_event.clone()));
        on_event(SpeechEvent::Ready);
        Ok(Self {
            jobs,
            voice: VoiceSettings::default(),
            cancel: CancellationToken::new(),
        })
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        self.jobs
            .send((job, self.cancel.clone()))
            .map_err(|_| Error::Speech("speech worker stopped".to_string()))
    }
}

impl SpeechEngine for CommandSpeech {
    fn apply_voice(&mut self, voice: &VoiceSettings) -> Result<()> {
        self.voice = voice.clone();
        Ok(())
    }

    fn speak(&mut self, id: UtteranceId, text: &str) -> Result<()> {
        self.enqueue(Job::Speak {
            id,
            text: text.to_string(),
            voice: self.voice.clone(),
        })
    }

    fn play_silence(&mut self, id: UtteranceId, duration: Duration) -> Result<()> {
        self.enqueue(Job::Silence { id, duration })
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }
}

/// Expand voice placeholders in the command template.
pub fn command_args(template: &[String], voice: &VoiceSettings) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{lang}", &voice.language)
                .replace("{rate}", &voice.rate.to_string())
                .replace("{pitch}", &voice.pitch.to_string())
        })
        .collect()
}

async fn run_jobs(
    template: Vec<String>,
    mut rx: mpsc::UnboundedReceiver<(Job, CancellationToken)>,
    on_event: SpeechCallback,
) {
    while let Some((job, cancel)) = rx.recv().await {
        // stopped before it started
        if cancel.is_cancelled() {
            continue;
        }
        let id = job.id();
        on_event(SpeechEvent::Started(id));
        let result = match job {
            Job::Silence { duration, .. } => {
                tokio::select! {
                    _ = cancel.cancelled() => continue,
                    _ = tokio::time::sleep(duration) => Ok(()),
                }
            }
            Job::Speak { text, voice, .. } => {
                let args = command_args(&template, &voice);
                match speak_once(&args, &text, &cancel).await {
                    Ok(true) => Ok(()),
                    Ok(false) => continue,
                    Err(e) => Err(e),
                }
            }
        };
        match result {
            Ok(()) => on_event(SpeechEvent::Done(id)),
            Err(e) => {
                tracing::warn!(%id, error = %e, "speech command failed");
                on_event(SpeechEvent::Failed {
                    id,
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Run one utterance. Returns `Ok(false)` if it was stopped.
async fn speak_once(args: &[String], text: &str, cancel: &CancellationToken) -> Result<bool> {
    let Some((program, rest)) = args.split_first() else {
        return Err(Error::Speech("speech command is empty".to_string()));
    };
    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Speech(format!("failed to start {program}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        // a synthesizer that ignores stdin may close it early
        let _ = stdin.write_all(text.as_bytes()).await;
    }

    tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            Ok(false)
        }
        status = child.wait() => {
            let status = status.map_err(|e| Error::Speech(e.to_string()))?;
            if status.success() {
                Ok(true)
            } else {
                Err(Error::Speech(format!("{program} exited with {status}")))
            }
        }
    }
}

/// Backend used when no speech command is configured. Every utterance
/// completes immediately.
pub struct SilentSpeech {
    on_event: SpeechCallback,
}

impl SilentSpeech {
    pub fn new(on_event: SpeechCallback) -> Self {
        on_event(SpeechEvent::Ready);
        Self { on_event }
    }

    fn finish(&self, id: UtteranceId) {
        (self.on_event)(SpeechEvent::Started(id));
        (self.on_event)(SpeechEvent::Done(id));
    }
}

impl SpeechEngine for SilentSpeech {
    fn apply_voice(&mut self, _voice: &VoiceSettings) -> Result<()> {
        Ok(())
    }

    fn speak(&mut self, id: UtteranceId, text: &str) -> Result<()> {
        tracing::debug!(%id, text, "speech disabled, skipping utterance");
        self.finish(id);
        Ok(())
    }

    fn play_silence(&mut self, id: UtteranceId, _duration: Duration) -> Result<()> {
        self.finish(id);
        Ok(())
    }

    fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_engine::utterance::UtteranceKind;

    fn recorder() -> (SpeechCallback, mpsc::UnboundedReceiver<SpeechEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: SpeechCallback = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (callback, rx)
    }

    #[test]
    fn test_command_args_substitutes_voice() {
        let template: Vec<String> = "espeak-ng -v {lang} -s {rate} -p {pitch} --stdin"
            .split_whitespace()
            .map(String::from)
            .collect();
        let voice = VoiceSettings {
            language: "en-US".into(),
            rate: 1.5,
            pitch: 0.8,
        };
        assert_eq!(
            command_args(&template, &voice),
            vec!["espeak-ng", "-v", "en-US", "-s", "1.5", "-p", "0.8", "--stdin"]
        );
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let (callback, _rx) = recorder();
        assert!(CommandSpeech::new("   ", callback).is_err());
    }

    #[tokio::test]
    async fn test_silent_speech_completes_immediately() {
        let (callback, mut rx) = recorder();
        let mut speech = SilentSpeech::new(callback);
        let id = UtteranceId::new(UtteranceKind::Speech);
        speech.speak(id, "hello").unwrap();
        assert_eq!(rx.recv().await, Some(SpeechEvent::Ready));
        assert_eq!(rx.recv().await, Some(SpeechEvent::Started(id)));
        assert_eq!(rx.recv().await, Some(SpeechEvent::Done(id)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_speech_runs_in_order() {
        let (callback, mut rx) = recorder();
        let mut speech = CommandSpeech::new("cat", callback).unwrap();
        let first = UtteranceId::new(UtteranceKind::Speech);
        let second = UtteranceId::new(UtteranceKind::Speech);
        speech.speak(first, "one").unwrap();
        speech.speak(second, "two").unwrap();

        let mut events = Vec::new();
        while events.len() < 5 {
            events.push(rx.recv().await.unwrap());
        }
        assert_eq!(
            events,
            vec![
                SpeechEvent::Ready,
                SpeechEvent::Started(first),
                SpeechEvent::Done(first),
                SpeechEvent::Started(second),
                SpeechEvent::Done(second),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_reports_failure() {
        let (callback, mut rx) = recorder();
        let mut speech = CommandSpeech::new("duet-no-such-synthesizer", callback).unwrap();
        let id = UtteranceId::new(UtteranceKind::Speech);
        speech.speak(id, "hi").unwrap();
        assert_eq!(rx.recv().await, Some(SpeechEvent::Ready));
        assert_eq!(rx.recv().await, Some(SpeechEvent::Started(id)));
        match rx.recv().await {
            Some(SpeechEvent::Failed { id: failed, .. }) => assert_eq!(failed, id),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_drops_queued_utterances() {
        let (callback, mut rx) = recorder();
        let mut speech = CommandSpeech::new("sleep 5", callback).unwrap();
        let playing = UtteranceId::new(UtteranceKind::Speech);
        let queued = UtteranceId::new(UtteranceKind::Speech);
        speech.speak(playing, "a").unwrap();
        speech.speak(queued, "b").unwrap();
        assert_eq!(rx.recv().await, Some(SpeechEvent::Ready));
        assert_eq!(rx.recv().await, Some(SpeechEvent::Started(playing)));
        speech.stop();

        let after = UtteranceId::new(UtteranceKind::Warmup);
        speech.play_silence(after, Duration::from_millis(10)).unwrap();
        assert_eq!(rx.recv().await, Some(SpeechEvent::Started(after)));
        assert_eq!(rx.recv().await, Some(SpeechEvent::Done(after)));
    }
}
