//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::Parser;
use std::path::PathBuf;

use crate::audio::{DEFAULT_FRAME_MS, PREFERRED_CHANNELS, PREFERRED_SAMPLE_RATE};
use defaults::*;
pub use defaults::{MAX_LOOP_DELAY_MS, MAX_RECORDING_HARD_LIMIT_MS};

/// CLI options for the voice companion. Validated values keep downstream subprocesses safe.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "teddy-voice",
    about = "Voice companion: listen, reply, speak",
    author,
    version
)]
pub struct AppConfig {
    /// Capture command; format arguments are appended (parec-compatible)
    #[arg(long, default_value = DEFAULT_CAPTURE_CMD)]
    pub capture_cmd: String,

    /// Capture device passed as --device to the capture command
    #[arg(long, env = "PULSE_SOURCE")]
    pub input_device: Option<String>,

    /// Preferred capture sample rate (Hz); 44100 and 48000 are tried after it
    #[arg(long, default_value_t = PREFERRED_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Preferred capture channel count
    #[arg(long, default_value_t = PREFERRED_CHANNELS)]
    pub channels: u16,

    /// Frame size fed to the VAD (milliseconds)
    #[arg(long, default_value_t = DEFAULT_FRAME_MS)]
    pub frame_ms: u64,

    /// Pause after starting a capture candidate before probing it (milliseconds)
    #[arg(long, default_value_t = DEFAULT_SETTLE_MS)]
    pub settle_ms: u64,

    /// How long a capture candidate may stay silent before it is rejected (milliseconds)
    #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT_MS)]
    pub probe_timeout_ms: u64,

    /// RMS level (16-bit units) that counts as speech
    #[arg(long, default_value_t = DEFAULT_SILENCE_THRESHOLD)]
    pub silence_threshold: f32,

    /// Trailing silence that ends an utterance (milliseconds)
    #[arg(long, default_value_t = DEFAULT_END_SILENCE_MS)]
    pub end_silence_ms: u64,

    /// Speech required before silence may end an utterance (milliseconds)
    #[arg(long, default_value_t = DEFAULT_MIN_SPEECH_MS)]
    pub min_speech_ms: u64,

    /// Hard cap on recorded frame time (milliseconds)
    #[arg(long, default_value_t = DEFAULT_MAX_RECORDING_MS)]
    pub max_recording_ms: u64,

    /// Wall-clock guard for a stalled capture stream (milliseconds)
    #[arg(long, default_value_t = DEFAULT_MAX_WALL_MS)]
    pub max_wall_ms: u64,

    /// Recordings at or below this many bytes count as no speech
    #[arg(long, default_value_t = DEFAULT_MIN_CLIP_BYTES)]
    pub min_clip_bytes: usize,

    /// Playback command; format arguments are appended (pacat-compatible)
    #[arg(long, default_value = DEFAULT_PLAYBACK_CMD)]
    pub playback_cmd: String,

    /// whisper.cpp CLI binary
    #[arg(long, default_value = DEFAULT_WHISPER_CMD)]
    pub whisper_cmd: String,

    /// Path to the ggml whisper model
    #[arg(long, default_value = DEFAULT_WHISPER_MODEL)]
    pub whisper_model: PathBuf,

    /// Language passed to Whisper
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Where the recorded clip is written for transcription
    #[arg(long, default_value = DEFAULT_CLIP_PATH)]
    pub clip_path: PathBuf,

    /// Ollama server base URL
    #[arg(long, default_value = DEFAULT_OLLAMA_URL)]
    pub ollama_url: String,

    /// Model used for replies
    #[arg(long, default_value = DEFAULT_LLM_MODEL)]
    pub llm_model: String,

    /// Request timeout for reply generation (milliseconds)
    #[arg(long, default_value_t = DEFAULT_LLM_TIMEOUT_MS)]
    pub llm_timeout_ms: u64,

    /// Replace the built-in system prompt
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Speech synthesis command (piper-compatible, raw s16le on stdout)
    #[arg(long, default_value = DEFAULT_TTS_CMD)]
    pub tts_cmd: String,

    /// Voice model file (.onnx) passed as `--model`; its output rate must match --tts-sample-rate
    #[arg(long, default_value = DEFAULT_TTS_VOICE)]
    pub tts_voice: String,

    /// Speaking rate multiplier
    #[arg(long, default_value_t = 1.0)]
    pub tts_speed: f32,

    /// Sample rate the synthesis command produces (Hz)
    #[arg(long, default_value_t = DEFAULT_TTS_SAMPLE_RATE)]
    pub tts_sample_rate: u32,

    /// GPIO line of a stop push button (active low, pull-up)
    #[arg(long)]
    pub stop_button_gpio: Option<u32>,

    /// sysfs GPIO root
    #[arg(long, default_value = DEFAULT_GPIO_ROOT)]
    pub gpio_root: PathBuf,

    /// Append chat events as JSON lines to this file
    #[arg(long)]
    pub events_log: Option<PathBuf>,

    /// User identifier stamped on chat events
    #[arg(long, env = "USER_ID", default_value = "child-1")]
    pub user_id: String,

    /// Device identifier stamped on chat events
    #[arg(long, env = "DEVICE_ID", default_value = "pi-1")]
    pub device_id: String,

    /// Pause between completed turns (milliseconds)
    #[arg(long, default_value_t = DEFAULT_RESTART_DELAY_MS)]
    pub restart_delay_ms: u64,

    /// Pause after a failed turn (milliseconds)
    #[arg(long, default_value_t = DEFAULT_ERROR_DELAY_MS)]
    pub error_delay_ms: u64,

    /// Record a single utterance, report it, and exit
    #[arg(long = "record-once", default_value_t = false)]
    pub record_once: bool,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "TEDDY_VOICE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "TEDDY_VOICE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcripts and replies (debug log only)
    #[arg(
        long = "log-content",
        env = "TEDDY_VOICE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}
