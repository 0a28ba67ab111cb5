//! Speech-to-text boundary.
//!
//! The recognizer itself is an external whisper.cpp-style CLI. This module
//! writes the clip to a WAV file, runs the CLI, and decides whether the text
//! that comes back is worth answering.

use crate::log_debug;
use crate::log_debug_content;
use crate::process::CommandLine;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Instant;

/// Upper bound on whisper worker threads; more does not help on small boards.
const MAX_WHISPER_THREADS: usize = 4;

/// Short transcripts Whisper tends to invent from near-silence.
const FILLER_TRANSCRIPTS: &[&str] = &["you", "thank you", "bye"];

/// A finished recording, borrowed from the session result.
#[derive(Debug, Clone, Copy)]
pub struct AudioClip<'a> {
    pub pcm: &'a [u8],
    pub sample_rate_hz: u32,
    pub channel_count: u16,
}

/// Anything that can turn a clip into raw text.
pub trait Transcriber {
    fn transcribe(&mut self, clip: &AudioClip<'_>) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    Text(String),
    /// Empty, non-speech markers only, or a known filler.
    NoUsableSpeech,
    /// The recognizer itself failed.
    Failed(String),
}

/// Run `transcriber` and classify the result.
pub fn transcribe_clip(transcriber: &mut dyn Transcriber, clip: &AudioClip<'_>) -> TranscriptOutcome {
    let started = Instant::now();
    let raw = match transcriber.transcribe(clip) {
        Ok(raw) => raw,
        Err(err) => {
            log_debug(&format!("transcription failed: {err:#}"));
            tracing::warn!(error = %format!("{err:#}"), "transcription failed");
            return TranscriptOutcome::Failed(format!("{err:#}"));
        }
    };
    let text = sanitize_transcript(&raw);
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        chars = text.len(),
        "transcription finished"
    );
    log_debug_content(&format!("transcript: {text:?}"));
    if text.is_empty() || is_filler(&text) {
        TranscriptOutcome::NoUsableSpeech
    } else {
        TranscriptOutcome::Text(text)
    }
}

/// Remove bracketed non-speech markers and collapse whitespace.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background|wind blowing)\s*)\)",
        )
        .ok()
    });
    let cleaned = match re {
        Some(re) => re.replace_all(trimmed, " ").into_owned(),
        None => trimmed.to_string(),
    };
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True for the handful of one-word hallucinations, ignoring case and trailing punctuation.
pub fn is_filler(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(|ch: char| ch.is_ascii_punctuation())
        .to_lowercase();
    FILLER_TRANSCRIPTS.contains(&normalized.as_str())
}

/// Write 16-bit PCM as a WAV file.
pub fn write_wav(path: &Path, clip: &AudioClip<'_>) -> Result<()> {
    let spec = hound::WavSpec {
        channels: clip.channel_count,
        sample_rate: clip.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    for pair in clip.pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer
        .finalize()
        .with_context(|| format!("failed to finalize '{}'", path.display()))?;
    Ok(())
}

/// Runs `whisper-cli -m MODEL -f CLIP -l LANG -t N -nt -np` and reads stdout.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    command: CommandLine,
    model: PathBuf,
    lang: String,
    clip_path: PathBuf,
    threads: usize,
}

impl CommandTranscriber {
    pub fn new(command: CommandLine, model: PathBuf, lang: String, clip_path: PathBuf) -> Self {
        Self {
            command,
            model,
            lang,
            clip_path,
            threads: num_cpus::get().clamp(1, MAX_WHISPER_THREADS),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub(crate) fn args(&self) -> Vec<String> {
        vec![
            "-m".to_string(),
            self.model.to_string_lossy().into_owned(),
            "-f".to_string(),
            self.clip_path.to_string_lossy().into_owned(),
            "-l".to_string(),
            self.lang.clone(),
            "-t".to_string(),
            self.threads.to_string(),
            "-nt".to_string(),
            "-np".to_string(),
        ]
    }
}

impl Transcriber for CommandTranscriber {
    fn transcribe(&mut self, clip: &AudioClip<'_>) -> Result<String> {
        write_wav(&self.clip_path, clip)?;
        let mut cmd = self.command.command();
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = cmd
            .output()
            .with_context(|| format!("failed to run '{}'", self.command.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().last().unwrap_or("").trim().to_string();
            bail!(
                "'{}' exited with {}: {last_line}",
                self.command.program,
                output.status
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct Canned(Result<String, String>);

    impl Transcriber for Canned {
        fn transcribe(&mut self, _clip: &AudioClip<'_>) -> Result<String> {
            self.0.clone().map_err(|msg| anyhow!(msg))
        }
    }

    fn clip(pcm: &[u8]) -> AudioClip<'_> {
        AudioClip {
            pcm,
            sample_rate_hz: 16_000,
            channel_count: 1,
        }
    }

    #[test]
    fn strips_markers_and_collapses_whitespace() {
        assert_eq!(
            sanitize_transcript("  [BLANK_AUDIO]  tell me   a story (music) "),
            "tell me a story"
        );
        assert_eq!(sanitize_transcript("[ ] ( )"), "");
        assert_eq!(sanitize_transcript("\n\n"), "");
    }

    #[test]
    fn fillers_are_case_and_punctuation_insensitive() {
        assert!(is_filler("You."));
        assert!(is_filler(" Thank you! "));
        assert!(is_filler("BYE"));
        assert!(!is_filler("thank you teddy"));
        assert!(!is_filler("you are nice"));
    }

    #[test]
    fn classifies_transcriber_output() {
        let pcm = [0u8; 4];
        assert_eq!(
            transcribe_clip(&mut Canned(Ok(" Hello there. ".into())), &clip(&pcm)),
            TranscriptOutcome::Text("Hello there.".into())
        );
        assert_eq!(
            transcribe_clip(&mut Canned(Ok("[BLANK_AUDIO]".into())), &clip(&pcm)),
            TranscriptOutcome::NoUsableSpeech
        );
        assert_eq!(
            transcribe_clip(&mut Canned(Ok("Thank you.".into())), &clip(&pcm)),
            TranscriptOutcome::NoUsableSpeech
        );
        assert!(matches!(
            transcribe_clip(&mut Canned(Err("model missing".into())), &clip(&pcm)),
            TranscriptOutcome::Failed(msg) if msg.contains("model missing")
        ));
    }

    #[test]
    fn wav_header_matches_clip_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.wav");
        let pcm: Vec<u8> = [100i16, -100, 2_000, -2_000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        write_wav(
            &path,
            &AudioClip {
                pcm: &pcm,
                sample_rate_hz: 44_100,
                channel_count: 2,
            },
        )
        .expect("write wav");
        let reader = hound::WavReader::open(&path).expect("open wav");
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .expect("samples");
        assert_eq!(samples, vec![100, -100, 2_000, -2_000]);
    }

    #[test]
    fn command_transcriber_passes_whisper_flags() {
        let transcriber = CommandTranscriber::new(
            CommandLine::parse("whisper-cli").expect("parse"),
            PathBuf::from("/models/ggml-tiny.en.bin"),
            "en".to_string(),
            PathBuf::from("/tmp/clip.wav"),
        );
        assert!((1..=MAX_WHISPER_THREADS).contains(&transcriber.threads()));
        let args = transcriber.args();
        assert_eq!(&args[..6], ["-m", "/models/ggml-tiny.en.bin", "-f", "/tmp/clip.wav", "-l", "en"]);
        assert_eq!(&args[8..], ["-nt", "-np"]);
    }

    #[test]
    fn command_transcriber_reads_stdout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clip_path = dir.path().join("clip.wav");
        let mut transcriber = CommandTranscriber::new(
            CommandLine::parse("sh -c 'echo \" [BLANK_AUDIO] tell me a story\"' whisper")
                .expect("parse"),
            PathBuf::from("model.bin"),
            "en".to_string(),
            clip_path.clone(),
        );
        let pcm = vec![0u8; 3_200];
        let outcome = transcribe_clip(&mut transcriber, &clip(&pcm));
        assert_eq!(outcome, TranscriptOutcome::Text("tell me a story".into()));
        assert!(clip_path.exists());
    }

    #[test]
    fn command_transcriber_reports_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut transcriber = CommandTranscriber::new(
            CommandLine::parse("sh -c 'echo boom >&2; exit 2' whisper").expect("parse"),
            PathBuf::from("model.bin"),
            "en".to_string(),
            dir.path().join("clip.wav"),
        );
        let pcm = vec![0u8; 64];
        assert!(matches!(
            transcribe_clip(&mut transcriber, &clip(&pcm)),
            TranscriptOutcome::Failed(msg) if msg.contains("boom")
        ));
    }
}
