//! Recording session: negotiation, the frame loop, and the final buffer.
//!
//! Manages the recording loop: feeds frames through the VAD, accumulates the
//! utterance, and decides when to stop based on VAD silence, the hard
//! duration cap, the wall-clock guard, stream end, or the stop signal.

use super::negotiate::{negotiate, NegotiationPlan, Negotiated};
use super::source::{CaptureLauncher, FrameSource};
use super::vad::{EnergyVad, VadConfig, VadDecision, VadState};
use super::{
    AudioConfig, DEFAULT_FRAME_MS, FALLBACK_FORMATS, PREFERRED_CHANNELS, PREFERRED_SAMPLE_RATE,
};
use crate::error::CaptureError;
use crate::log_debug;
use crate::stop::StopSignal;
use std::time::{Duration, Instant};

/// Everything a recording session needs, fixed at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub preferred: (u32, u16),
    pub fallbacks: Vec<(u32, u16)>,
    pub vad: VadConfig,
    /// Hard cap on accumulated frame time, speaking or not.
    pub max_recording_ms: u64,
    /// Wall-clock guard for streams that deliver slower than real time.
    pub max_wall_ms: u64,
    /// Buffers at or below this size count as "no speech".
    pub min_clip_bytes: usize,
    pub settle_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preferred: (PREFERRED_SAMPLE_RATE, PREFERRED_CHANNELS),
            fallbacks: FALLBACK_FORMATS.to_vec(),
            vad: VadConfig::default(),
            max_recording_ms: 15_000,
            max_wall_ms: 20_000,
            min_clip_bytes: 1_000,
            settle_ms: 100,
            probe_timeout_ms: 1_000,
        }
    }
}

impl SessionConfig {
    pub fn frame_ms(&self) -> u64 {
        if self.vad.frame_ms == 0 {
            DEFAULT_FRAME_MS
        } else {
            self.vad.frame_ms
        }
    }

    pub fn negotiation_plan(&self) -> NegotiationPlan {
        NegotiationPlan::new(
            self.preferred,
            &self.fallbacks,
            self.frame_ms(),
            Duration::from_millis(self.settle_ms),
            Duration::from_millis(self.probe_timeout_ms),
        )
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    VadSilence { tail_ms: u64 },
    MaxDuration,
    ManualStop,
    StreamEnd,
    Timeout,
    Error(String),
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::VadSilence { .. } => "vad_silence",
            StopReason::MaxDuration => "max_duration",
            StopReason::ManualStop => "manual_stop",
            StopReason::StreamEnd => "stream_end",
            StopReason::Timeout => "timeout",
            StopReason::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureMetrics {
    pub capture_ms: u64,
    pub speech_ms: u64,
    pub silence_tail_ms: u64,
    pub frames_processed: usize,
    pub stop_reason: StopReason,
}

impl CaptureMetrics {
    fn cancelled() -> Self {
        Self {
            capture_ms: 0,
            speech_ms: 0,
            silence_tail_ms: 0,
            frames_processed: 0,
            stop_reason: StopReason::ManualStop,
        }
    }
}

/// Terminal output of a recording session.
///
/// `audio` is `None` when nothing usable was heard or the session was cancelled;
/// `metrics.stop_reason` tells the two apart.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub audio: Option<Vec<u8>>,
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub metrics: CaptureMetrics,
}

impl SessionResult {
    pub fn was_cancelled(&self) -> bool {
        self.metrics.stop_reason == StopReason::ManualStop
    }

    pub fn has_speech(&self) -> bool {
        self.audio.is_some()
    }
}

/// Hooks for live feedback while recording. Both default to no-ops.
pub trait CaptureObserver {
    fn on_level(&mut self, _rms: f32) {}
    fn on_speech_start(&mut self) {}
}

pub struct NoopObserver;

impl CaptureObserver for NoopObserver {}

/// Terminates the stream on every exit path, unwinding included.
struct SourceGuard(Box<dyn FrameSource>);

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.0.terminate();
    }
}

/// Drives negotiation, the frame loop, and buffer assembly for one utterance.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    cfg: SessionConfig,
}

impl RecordingSession {
    pub fn new(cfg: SessionConfig) -> Self {
        Self { cfg }
    }

    /// Record one utterance.
    ///
    /// Errors only when no capture stream could be opened. Cancellation, stream
    /// end, and "heard nothing" all come back as a [`SessionResult`].
    pub fn record(
        &self,
        launcher: &mut dyn CaptureLauncher,
        stop: &dyn StopSignal,
        observer: &mut dyn CaptureObserver,
    ) -> Result<SessionResult, CaptureError> {
        if stop.is_raised() {
            let (rate, channels) = self.cfg.preferred;
            return Ok(SessionResult {
                audio: None,
                sample_rate_hz: rate,
                channel_count: channels,
                metrics: CaptureMetrics::cancelled(),
            });
        }

        let Negotiated {
            source,
            config,
            first_frame,
        } = negotiate(launcher, &self.cfg.negotiation_plan())?;
        let mut guard = SourceGuard(source);
        let (buffer, metrics) =
            self.run_frames(guard.0.as_mut(), &config, first_frame, stop, observer);
        drop(guard);

        Ok(self.finish(config, buffer, metrics))
    }

    fn run_frames(
        &self,
        source: &mut dyn FrameSource,
        config: &AudioConfig,
        first_frame: Vec<u8>,
        stop: &dyn StopSignal,
        observer: &mut dyn CaptureObserver,
    ) -> (Vec<u8>, CaptureMetrics) {
        let frame_ms = config.frame_duration_ms;
        let mut vad = EnergyVad::new(VadConfig {
            frame_ms,
            ..self.cfg.vad
        });
        let max_wall = Duration::from_millis(self.cfg.max_wall_ms);
        let started = Instant::now();
        let mut buffer = Vec::new();
        let mut total_ms = 0u64;
        let mut frames = 0usize;
        let mut pending = Some(first_frame);

        let stop_reason = loop {
            let frame = match pending.take() {
                Some(frame) => frame,
                None => match source.read_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        break if stop.is_raised() {
                            StopReason::ManualStop
                        } else {
                            StopReason::StreamEnd
                        };
                    }
                    Err(err) => {
                        log_debug(&format!("capture read failed: {err}"));
                        break if stop.is_raised() {
                            StopReason::ManualStop
                        } else {
                            StopReason::Error(err.to_string())
                        };
                    }
                },
            };

            frames += 1;
            let was_idle = vad.state() == VadState::Idle;
            let (energy, decision) = vad.process_frame(&frame);
            observer.on_level(energy);
            if was_idle && vad.state() == VadState::Speaking {
                observer.on_speech_start();
            }
            if decision.keeps_frame() {
                buffer.extend_from_slice(&frame);
            }
            total_ms = total_ms.saturating_add(frame_ms);

            if stop.is_raised() {
                break StopReason::ManualStop;
            }
            if decision == VadDecision::AppendAndStop {
                break StopReason::VadSilence {
                    tail_ms: vad.silence_ms(),
                };
            }
            if total_ms >= self.cfg.max_recording_ms {
                break StopReason::MaxDuration;
            }
            if started.elapsed() >= max_wall {
                break StopReason::Timeout;
            }
        };

        let metrics = CaptureMetrics {
            capture_ms: total_ms,
            speech_ms: vad.speech_ms(),
            silence_tail_ms: vad.silence_ms(),
            frames_processed: frames,
            stop_reason,
        };
        (buffer, metrics)
    }

    fn finish(&self, config: AudioConfig, buffer: Vec<u8>, metrics: CaptureMetrics) -> SessionResult {
        log_session_metrics(&metrics, buffer.len());
        let audio = if metrics.stop_reason == StopReason::ManualStop {
            // Partial utterances are dropped rather than sent half-finished.
            None
        } else if buffer.len() <= self.cfg.min_clip_bytes {
            None
        } else {
            Some(buffer)
        };
        SessionResult {
            audio,
            sample_rate_hz: config.sample_rate_hz,
            channel_count: config.channel_count,
            metrics,
        }
    }
}

/// Emit one structured record per session.
fn log_session_metrics(metrics: &CaptureMetrics, buffered_bytes: usize) {
    tracing::info!(
        capture_ms = metrics.capture_ms,
        speech_ms = metrics.speech_ms,
        silence_tail_ms = metrics.silence_tail_ms,
        frames_processed = metrics.frames_processed,
        buffered_bytes,
        stop = metrics.stop_reason.label(),
        "voice_metrics"
    );
    log_debug(&format!(
        "voice_metrics|capture_ms={}|speech_ms={}|silence_tail_ms={}|frames={}|bytes={}|stop={}",
        metrics.capture_ms,
        metrics.speech_ms,
        metrics.silence_tail_ms,
        metrics.frames_processed,
        buffered_bytes,
        metrics.stop_reason.label()
    ));
}
