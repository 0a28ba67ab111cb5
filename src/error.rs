//! Error types for the capture and playback controllers.
//!
//! Only conditions the caller must act on are errors. Stream end and
//! cancellation are ordinary outcomes and never show up here.

use std::io;
use std::process::ExitStatus;
use thiserror::Error;

/// Recording could not start.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Every candidate configuration spawned but none produced audio.
    #[error("no capture device produced audio after {attempts} configuration(s)")]
    NoDevice { attempts: usize },

    /// The capture binary could not be spawned for any configuration.
    #[error("failed to spawn capture process: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
}

/// Speech output for one turn failed.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to spawn playback process: {0}")]
    Spawn(#[source] io::Error),

    #[error("playback stream error: {0}")]
    Io(#[from] io::Error),

    #[error("playback process exited with {0}")]
    Player(ExitStatus),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
}
