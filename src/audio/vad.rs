//! Voice Activity Detection (VAD) for speech/silence classification.
//!
//! A fixed RMS threshold splits frames into loud and quiet, and a two-state
//! timing machine turns that stream into utterance boundaries. There is no
//! noise-floor calibration: rooms louder than the threshold will never read as
//! silent.

use super::meter::pcm16_rms;
use super::DEFAULT_FRAME_MS;

/// Thresholds for the energy VAD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// RMS (in raw 16-bit units) a frame must exceed to start an utterance.
    pub silence_threshold: f32,
    /// Consecutive quiet time that ends an utterance.
    pub end_silence_ms: u64,
    /// Speech that must accumulate before silence may end an utterance.
    pub min_speech_ms: u64,
    pub frame_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 250.0,
            end_silence_ms: 600,
            min_speech_ms: 250,
            frame_ms: DEFAULT_FRAME_MS,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VadState {
    Idle,
    Speaking,
}

/// What the caller should do with the frame that was just classified.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VadDecision {
    /// Still idle: drop the frame.
    Discard,
    /// Part of the utterance: keep it.
    Append,
    /// Keep it, and the utterance is over.
    AppendAndStop,
}

impl VadDecision {
    pub fn keeps_frame(self) -> bool {
        !matches!(self, VadDecision::Discard)
    }
}

/// Two-state energy VAD.
///
/// Idle until a frame's energy exceeds the threshold. While speaking, every
/// frame is kept; quiet frames grow `silence_ms`, loud ones reset it and grow
/// `speech_ms`. The utterance ends once both
/// `silence_ms >= end_silence_ms` and `speech_ms >= min_speech_ms` hold.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    cfg: VadConfig,
    state: VadState,
    silence_ms: u64,
    speech_ms: u64,
}

impl EnergyVad {
    pub fn new(cfg: VadConfig) -> Self {
        Self {
            cfg,
            state: VadState::Idle,
            silence_ms: 0,
            speech_ms: 0,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn speech_ms(&self) -> u64 {
        self.speech_ms
    }

    pub fn silence_ms(&self) -> u64 {
        self.silence_ms
    }

    /// Advance the machine by one frame of the given RMS energy.
    pub fn step(&mut self, energy: f32) -> VadDecision {
        let frame_ms = self.cfg.frame_ms;
        match self.state {
            VadState::Idle => {
                if energy > self.cfg.silence_threshold {
                    self.state = VadState::Speaking;
                    // The onset frame is speech too.
                    self.speech_ms = frame_ms;
                    self.silence_ms = 0;
                    VadDecision::Append
                } else {
                    VadDecision::Discard
                }
            }
            VadState::Speaking => {
                if energy < self.cfg.silence_threshold {
                    self.silence_ms = self.silence_ms.saturating_add(frame_ms);
                } else {
                    self.silence_ms = 0;
                    self.speech_ms = self.speech_ms.saturating_add(frame_ms);
                }
                if self.silence_ms >= self.cfg.end_silence_ms
                    && self.speech_ms >= self.cfg.min_speech_ms
                {
                    VadDecision::AppendAndStop
                } else {
                    VadDecision::Append
                }
            }
        }
    }

    /// Classify a raw PCM frame. Returns the measured energy with the decision.
    pub fn process_frame(&mut self, frame: &[u8]) -> (f32, VadDecision) {
        let energy = pcm16_rms(frame);
        (energy, self.step(energy))
    }
}
