//! Probe candidate capture formats until one actually produces audio.

use super::source::{CaptureLauncher, FrameSource};
use super::AudioConfig;
use crate::error::CaptureError;
use crate::log_debug;
use std::io;
use std::thread;
use std::time::Duration;

/// Ordered candidates plus probe timing.
#[derive(Debug, Clone)]
pub struct NegotiationPlan {
    /// (sample rate, channels) in the order they are tried.
    pub candidates: Vec<(u32, u16)>,
    pub frame_duration_ms: u64,
    /// Pause between spawning and the first read.
    pub settle: Duration,
    /// Upper bound on waiting for the first bytes from a candidate.
    pub probe_timeout: Duration,
}

impl NegotiationPlan {
    /// Preferred format first, then fallbacks, without repeats.
    pub fn new(
        preferred: (u32, u16),
        fallbacks: &[(u32, u16)],
        frame_duration_ms: u64,
        settle: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let mut candidates = vec![preferred];
        for candidate in fallbacks {
            if !candidates.contains(candidate) {
                candidates.push(*candidate);
            }
        }
        Self {
            candidates,
            frame_duration_ms,
            settle,
            probe_timeout,
        }
    }
}

/// The winning candidate: live stream, its format, and the probe frame.
pub struct Negotiated {
    pub source: Box<dyn FrameSource>,
    pub config: AudioConfig,
    /// Real audio read while probing; the session must process it first.
    pub first_frame: Vec<u8>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("config", &self.config)
            .field("first_frame_len", &self.first_frame.len())
            .finish_non_exhaustive()
    }
}

/// Try each candidate in order and return the first that yields data.
///
/// Candidates that spawn but stay silent are terminated before moving on. If
/// nothing could even be spawned, the last spawn error is reported instead of
/// `NoDevice`, since retrying will not help.
pub fn negotiate(
    launcher: &mut dyn CaptureLauncher,
    plan: &NegotiationPlan,
) -> Result<Negotiated, CaptureError> {
    let mut spawn_error: Option<io::Error> = None;
    let mut spawned = 0usize;

    for &(rate, channels) in &plan.candidates {
        let config = AudioConfig::new(rate, channels, plan.frame_duration_ms);
        let mut source = match launcher.launch(&config) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(rate, channels, error = %err, "capture spawn failed");
                spawn_error = Some(err);
                continue;
            }
        };
        spawned += 1;

        if !plan.settle.is_zero() {
            thread::sleep(plan.settle);
        }

        match probe(source.as_mut(), plan.probe_timeout) {
            Ok(Some(first_frame)) => {
                tracing::info!(rate, channels, "capture format negotiated");
                log_debug(&format!(
                    "negotiate: selected {rate}Hz/{channels}ch ({} probe bytes)",
                    first_frame.len()
                ));
                return Ok(Negotiated {
                    source,
                    config,
                    first_frame,
                });
            }
            Ok(None) => {
                tracing::warn!(rate, channels, "capture produced no audio");
            }
            Err(err) => {
                tracing::warn!(rate, channels, error = %err, "capture probe failed");
            }
        }
        source.terminate();
    }

    match spawn_error {
        Some(source) if spawned == 0 => Err(CaptureError::Spawn { source }),
        _ => Err(CaptureError::NoDevice {
            attempts: plan.candidates.len(),
        }),
    }
}

fn probe(source: &mut dyn FrameSource, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
    if !source.wait_ready(timeout)? {
        return Ok(None);
    }
    Ok(source.read_frame()?.filter(|frame| !frame.is_empty()))
}
