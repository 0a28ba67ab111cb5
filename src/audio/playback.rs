//! Interruptible playback of synthesized speech through an external player.
//!
//! Segments are concatenated into one s16le buffer and written to the
//! player's stdin in small chunks. The stop signal is polled between chunks
//! and while the player drains; when it fires, the player is killed rather
//! than allowed to finish.

use super::pipe::wait_writable;
use super::BYTES_PER_SAMPLE;
use crate::error::PlaybackError;
use crate::log_debug;
use crate::process::{ChildGuard, CommandLine};
use crate::stop::StopSignal;
use std::fmt;
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::process::{ChildStdin, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

/// Largest single write; at most one pipe page so a writable pipe never blocks us.
pub(crate) const WRITE_CHUNK_BYTES: usize = 4096;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Interrupted,
}

/// Write side of a running player.
pub trait PlaybackSink {
    /// Write a prefix of `pcm`, waiting at most `timeout` for room.
    /// Returns the number of bytes accepted; 0 means "not ready yet".
    fn write_chunk(&mut self, pcm: &[u8], timeout: Duration) -> io::Result<usize>;

    /// Close the input so the player drains and exits.
    fn finish_input(&mut self);

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Stop output immediately and reap the player. Idempotent.
    fn kill(&mut self);
}

/// Starts a mono player at the given sample rate.
pub trait PlaybackLauncher {
    fn launch(&mut self, sample_rate: u32) -> io::Result<Box<dyn PlaybackSink>>;
}

/// Launches `pacat`-style players that read raw PCM on stdin.
#[derive(Debug, Clone)]
pub struct ProcessPlaybackLauncher {
    command: CommandLine,
}

impl ProcessPlaybackLauncher {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }

    pub(crate) fn format_args(sample_rate: u32) -> Vec<String> {
        vec![
            "--playback".to_string(),
            "--format=s16le".to_string(),
            format!("--rate={sample_rate}"),
            "--channels=1".to_string(),
        ]
    }
}

impl PlaybackLauncher for ProcessPlaybackLauncher {
    fn launch(&mut self, sample_rate: u32) -> io::Result<Box<dyn PlaybackSink>> {
        let mut cmd = self.command.command();
        cmd.args(Self::format_args(sample_rate))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        let guard = ChildGuard::new(child, "playback");
        if stdin.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "playback process has no stdin pipe",
            ));
        }
        tracing::debug!(pid = guard.id(), sample_rate, "playback process spawned");
        Ok(Box::new(PlayerProcess { guard, stdin }))
    }
}

struct PlayerProcess {
    guard: ChildGuard,
    stdin: Option<ChildStdin>,
}

impl PlaybackSink for PlayerProcess {
    fn write_chunk(&mut self, pcm: &[u8], timeout: Duration) -> io::Result<usize> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "playback input already closed",
            ));
        };
        if pcm.is_empty() || !wait_writable(stdin.as_raw_fd(), timeout)? {
            return Ok(0);
        }
        let len = pcm.len().min(WRITE_CHUNK_BYTES);
        stdin.write(&pcm[..len])
    }

    fn finish_input(&mut self) {
        self.stdin = None;
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        self.guard.try_wait()
    }

    fn kill(&mut self) {
        self.stdin = None;
        self.guard.kill_and_reap();
    }
}

/// Kills the player on any early exit (error or unwind).
struct SinkGuard {
    sink: Box<dyn PlaybackSink>,
    exited: bool,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        if !self.exited {
            self.sink.kill();
        }
    }
}

/// Convert float samples in [-1, 1] to clipped 16-bit little-endian PCM.
pub fn pcm16_le_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32_767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Plays one utterance of synthesized audio.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    poll_interval: Duration,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PlaybackController {
    /// `poll_interval` bounds how long a stop request can go unnoticed.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Collect `segments`, then stream them to a freshly launched player.
    ///
    /// No segments (or only empty ones) means nothing is spawned and the call
    /// completes immediately. A raised stop signal at any point yields
    /// [`PlaybackOutcome::Interrupted`] with the player already dead.
    pub fn play<I, E>(
        &self,
        launcher: &mut dyn PlaybackLauncher,
        segments: I,
        sample_rate: u32,
        stop: &dyn StopSignal,
    ) -> Result<PlaybackOutcome, PlaybackError>
    where
        I: IntoIterator<Item = Result<Vec<f32>, E>>,
        E: fmt::Display,
    {
        let mut samples = Vec::new();
        for segment in segments {
            if stop.is_raised() {
                return Ok(PlaybackOutcome::Interrupted);
            }
            let segment = segment.map_err(|err| PlaybackError::Synthesis(err.to_string()))?;
            samples.extend_from_slice(&segment);
        }
        if samples.is_empty() {
            return Ok(PlaybackOutcome::Completed);
        }
        if stop.is_raised() {
            return Ok(PlaybackOutcome::Interrupted);
        }

        let pcm = pcm16_le_bytes(&samples);
        drop(samples);
        let sink = launcher.launch(sample_rate).map_err(PlaybackError::Spawn)?;
        let mut guard = SinkGuard {
            sink,
            exited: false,
        };

        let outcome = self.stream(&mut guard, &pcm, stop)?;
        tracing::info!(
            bytes = pcm.len(),
            sample_rate,
            outcome = ?outcome,
            "playback finished"
        );
        Ok(outcome)
    }

    fn stream(
        &self,
        guard: &mut SinkGuard,
        pcm: &[u8],
        stop: &dyn StopSignal,
    ) -> Result<PlaybackOutcome, PlaybackError> {
        let mut offset = 0;
        while offset < pcm.len() {
            if stop.is_raised() {
                return Ok(self.interrupt(guard, offset));
            }
            match guard.sink.write_chunk(&pcm[offset..], self.poll_interval) {
                Ok(written) => offset += written,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(PlaybackError::Io(err)),
            }
        }

        guard.sink.finish_input();
        loop {
            if stop.is_raised() {
                return Ok(self.interrupt(guard, offset));
            }
            match guard.sink.try_exit()? {
                Some(status) => {
                    guard.exited = true;
                    if status.success() {
                        return Ok(PlaybackOutcome::Completed);
                    }
                    return Err(PlaybackError::Player(status));
                }
                None => thread::sleep(self.poll_interval),
            }
        }
    }

    fn interrupt(&self, guard: &mut SinkGuard, written: usize) -> PlaybackOutcome {
        guard.sink.kill();
        guard.exited = true;
        log_debug(&format!("playback interrupted after {written} bytes"));
        PlaybackOutcome::Interrupted
    }
}
