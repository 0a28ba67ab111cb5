//! Speech synthesis boundary.
//!
//! Synthesizers hand back a lazy sequence of float segments at a declared
//! sample rate; the playback controller decides when to pull them.

use crate::process::{ChildGuard, CommandLine};
use anyhow::{anyhow, bail, Context, Result};
use std::io::{Read, Write};
use std::process::{ChildStdout, Stdio};

/// Lazily produced audio, samples in [-1, 1].
pub type SpeechSegments<'a> = Box<dyn Iterator<Item = Result<Vec<f32>>> + 'a>;

pub trait SpeechSynthesizer {
    /// Rate of every sample this synthesizer yields.
    fn sample_rate(&self) -> u32;

    fn synthesize<'a>(&'a mut self, text: &str) -> Result<SpeechSegments<'a>>;
}

/// Bytes of raw PCM pulled from the synthesizer per segment.
const SEGMENT_BYTES: usize = 16 * 1024;

/// Piper-style CLI: text on stdin, raw mono s16le on stdout.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    command: CommandLine,
    voice: String,
    speed: f32,
    sample_rate: u32,
}

impl CommandSynthesizer {
    pub fn new(command: CommandLine, voice: String, speed: f32, sample_rate: u32) -> Self {
        Self {
            command,
            voice,
            speed,
            sample_rate,
        }
    }

    pub(crate) fn args(&self) -> Vec<String> {
        // Piper expresses speed as phoneme length: 2.0x speed is 0.5 length.
        let length_scale = 1.0 / self.speed.max(f32::EPSILON);
        vec![
            "--model".to_string(),
            self.voice.clone(),
            "--length_scale".to_string(),
            format!("{length_scale:.3}"),
            "--output-raw".to_string(),
        ]
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize<'a>(&'a mut self, text: &str) -> Result<SpeechSegments<'a>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let mut cmd = self.command.command();
        cmd.args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start '{}'", self.command.display()))?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let guard = ChildGuard::new(child, "synthesis");
        let (Some(mut stdin), Some(stdout)) = (stdin, stdout) else {
            bail!("synthesis process is missing its pipes");
        };
        // Text is a sentence or two; it fits in the pipe buffer.
        stdin
            .write_all(text.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .context("failed to send text to synthesizer")?;
        drop(stdin);
        tracing::debug!(pid = guard.id(), chars = text.len(), "synthesis started");
        Ok(Box::new(RawPcmSegments {
            guard: Some(guard),
            stdout,
        }))
    }
}

/// Reads s16le from the synthesizer until EOF, then checks its exit status.
struct RawPcmSegments {
    guard: Option<ChildGuard>,
    stdout: ChildStdout,
}

impl RawPcmSegments {
    fn finish(&mut self) -> Option<Result<Vec<f32>>> {
        let mut guard = self.guard.take()?;
        match guard.wait() {
            Ok(Some(status)) if !status.success() => {
                Some(Err(anyhow!("synthesizer exited with {status}")))
            }
            Ok(_) => None,
            Err(err) => Some(Err(anyhow!("failed to wait for synthesizer: {err}"))),
        }
    }
}

impl Iterator for RawPcmSegments {
    type Item = Result<Vec<f32>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.guard.as_ref()?;
        let mut buf = vec![0u8; SEGMENT_BYTES];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    if let Some(mut guard) = self.guard.take() {
                        guard.kill_and_reap();
                    }
                    return Some(Err(anyhow!("failed to read synthesized audio: {err}")));
                }
            }
        }
        if filled < 2 {
            return self.finish();
        }
        // A trailing odd byte can only come at EOF; it is dropped.
        let samples = buf[..filled - filled % 2]
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32_768.0)
            .collect();
        Some(Ok(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthesizer(script: &str) -> CommandSynthesizer {
        let line = format!("sh -c {} synth", shell_words::quote(script));
        CommandSynthesizer::new(
            CommandLine::parse(&line).expect("parse"),
            "voice.onnx".to_string(),
            1.0,
            24_000,
        )
    }

    #[test]
    fn speed_maps_to_length_scale() {
        let synth = CommandSynthesizer::new(
            CommandLine::parse("piper").expect("parse"),
            "voice.onnx".to_string(),
            2.0,
            22_050,
        );
        assert_eq!(
            synth.args(),
            vec!["--model", "voice.onnx", "--length_scale", "0.500", "--output-raw"]
        );
        assert_eq!(synth.sample_rate(), 22_050);
    }

    #[test]
    fn streams_raw_pcm_in_segments() {
        // 40000 zero bytes: three segments' worth of silence.
        let mut synth = synthesizer("cat > /dev/null; head -c 40000 /dev/zero");
        let segments: Vec<Vec<f32>> = synth
            .synthesize("hello there")
            .expect("spawn")
            .collect::<Result<_>>()
            .expect("segments");
        assert_eq!(segments.len(), 3);
        let total: usize = segments.iter().map(Vec::len).sum();
        assert_eq!(total, 20_000);
        assert!(segments.iter().flatten().all(|s| *s == 0.0));
    }

    #[test]
    fn empty_text_yields_nothing_without_spawning() {
        let mut synth = synthesizer("exit 9");
        assert_eq!(synth.synthesize("   ").expect("no-op").count(), 0);
    }

    #[test]
    fn failing_synthesizer_surfaces_error() {
        let mut synth = synthesizer("cat > /dev/null; exit 3");
        let items: Vec<Result<Vec<f32>>> = synth.synthesize("hi").expect("spawn").collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn text_reaches_synthesizer_stdin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let seen = dir.path().join("seen.txt");
        let script = format!("cat > {}", shell_words::quote(&seen.to_string_lossy()));
        let mut synth = synthesizer(&script);
        assert_eq!(synth.synthesize(" Once upon a time ").expect("spawn").count(), 0);
        assert_eq!(
            std::fs::read_to_string(seen).expect("read"),
            "Once upon a time\n"
        );
    }
}
