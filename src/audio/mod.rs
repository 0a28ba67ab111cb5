//! Audio capture and voice activity detection (VAD) pipeline, plus playback.
//!
//! Capture and playback both run through external subprocesses (`parec`/`pacat`
//! by default) that stream raw 16-bit little-endian PCM over pipes. Recording
//! negotiates a working device configuration, runs an energy VAD over 30 ms
//! frames, and returns the utterance once the speaker goes quiet.

/// Bytes per 16-bit PCM sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Frame duration used for every capture session.
pub const DEFAULT_FRAME_MS: u64 = 30;

/// Preferred capture format: 16 kHz mono is what Whisper wants.
pub const PREFERRED_SAMPLE_RATE: u32 = 16_000;
pub const PREFERRED_CHANNELS: u16 = 1;

/// Configurations tried, in order, after the preferred one fails.
pub const FALLBACK_FORMATS: [(u32, u16); 2] = [(44_100, 1), (48_000, 1)];

mod meter;
mod negotiate;
mod pipe;
mod playback;
mod session;
mod source;
mod vad;

pub use meter::{level_blocks, pcm16_rms};
pub use negotiate::{negotiate, NegotiationPlan, Negotiated};
pub use playback::{
    pcm16_le_bytes, PlaybackController, PlaybackLauncher, PlaybackOutcome, PlaybackSink,
    ProcessPlaybackLauncher,
};
pub use session::{
    CaptureMetrics, CaptureObserver, NoopObserver, RecordingSession, SessionConfig,
    SessionResult, StopReason,
};
pub use source::{CaptureLauncher, FrameSource, ProcessCaptureLauncher};
pub use vad::{EnergyVad, VadConfig, VadDecision, VadState};

/// Format of one capture session. Rate and channels come from negotiation and
/// stay fixed for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub frame_duration_ms: u64,
}

impl AudioConfig {
    pub fn new(sample_rate_hz: u32, channel_count: u16, frame_duration_ms: u64) -> Self {
        Self {
            sample_rate_hz,
            channel_count,
            frame_duration_ms,
        }
    }

    /// Size of one frame: `rate * frame_ms / 1000 * channels * 2`.
    pub fn frame_bytes(&self) -> usize {
        let samples_per_channel =
            (u64::from(self.sample_rate_hz) * self.frame_duration_ms / 1000) as usize;
        samples_per_channel * usize::from(self.channel_count) * BYTES_PER_SAMPLE
    }
}
