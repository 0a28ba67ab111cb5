//! Capture subprocess wrapper that yields fixed-duration PCM frames.

use super::pipe::wait_readable;
use super::AudioConfig;
use crate::process::{ChildGuard, CommandLine};
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::process::{ChildStdout, Stdio};
use std::time::Duration;

/// Latency hint passed to the capture process.
const CAPTURE_LATENCY_MS: u32 = 50;

/// A live stream of PCM frames.
pub trait FrameSource {
    /// Blocking read of one frame's worth of bytes. A short read is returned
    /// as-is when the stream ends mid-frame; after that, `Ok(None)`.
    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Wait up to `timeout` for bytes to become available. Used to probe a
    /// freshly spawned process without hanging on a silent one.
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Kill and reap the underlying process. Idempotent.
    fn terminate(&mut self);
}

/// Spawns a capture stream for a given format.
pub trait CaptureLauncher {
    fn launch(&mut self, config: &AudioConfig) -> io::Result<Box<dyn FrameSource>>;
}

/// Launches a PulseAudio-style recorder (`parec` by default) and reads its stdout.
#[derive(Debug, Clone)]
pub struct ProcessCaptureLauncher {
    command: CommandLine,
    device: Option<String>,
}

impl ProcessCaptureLauncher {
    pub fn new(command: CommandLine, device: Option<String>) -> Self {
        Self { command, device }
    }

    /// Arguments appended after the configured command line.
    pub(crate) fn format_args(&self, config: &AudioConfig) -> Vec<String> {
        let mut args = vec![
            "--format=s16le".to_string(),
            format!("--rate={}", config.sample_rate_hz),
            format!("--channels={}", config.channel_count),
            format!("--latency-msec={CAPTURE_LATENCY_MS}"),
        ];
        if let Some(device) = &self.device {
            args.push(format!("--device={device}"));
        }
        args
    }
}

impl CaptureLauncher for ProcessCaptureLauncher {
    fn launch(&mut self, config: &AudioConfig) -> io::Result<Box<dyn FrameSource>> {
        let mut cmd = self.command.command();
        cmd.args(self.format_args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn()?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _guard = ChildGuard::new(child, "capture");
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "capture process has no stdout pipe",
                ));
            }
        };
        tracing::debug!(
            pid = child.id(),
            rate = config.sample_rate_hz,
            channels = config.channel_count,
            "capture process spawned"
        );
        Ok(Box::new(CaptureProcess {
            guard: ChildGuard::new(child, "capture"),
            stdout,
            frame_bytes: config.frame_bytes().max(1),
            ended: false,
        }))
    }
}

/// A running capture process. Dropping it kills and reaps the child.
struct CaptureProcess {
    guard: ChildGuard,
    stdout: ChildStdout,
    frame_bytes: usize,
    ended: bool,
}

impl FrameSource for CaptureProcess {
    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.ended {
            return Ok(None);
        }
        let mut frame = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < frame.len() {
            match self.stdout.read(&mut frame[filled..]) {
                Ok(0) => {
                    self.ended = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        frame.truncate(filled);
        Ok(Some(frame))
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        wait_readable(self.stdout.as_raw_fd(), timeout)
    }

    fn terminate(&mut self) {
        self.ended = true;
        self.guard.kill_and_reap();
    }
}
