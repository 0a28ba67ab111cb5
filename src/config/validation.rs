use super::defaults::{ISO_639_1_CODES, MAX_LOOP_DELAY_MS, MAX_RECORDING_HARD_LIMIT_MS};
use super::AppConfig;
use crate::audio::{SessionConfig, VadConfig, FALLBACK_FORMATS};
use crate::conversation::ConversationConfig;
use crate::process::CommandLine;
use crate::reply::DEFAULT_SYSTEM_PROMPT;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::time::Duration;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// File logging is on when asked for and not vetoed by `--no-logs`.
    pub fn logging_enabled(&self) -> bool {
        (self.logs || self.log_timings) && !self.no_logs
    }

    /// Check CLI values and normalize strings.
    pub fn validate(&mut self) -> Result<()> {
        if !(8_000..=96_000).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between 8000 and 96000 Hz, got {}",
                self.sample_rate
            );
        }
        if !(1..=8).contains(&self.channels) {
            bail!("--channels must be between 1 and 8, got {}", self.channels);
        }
        if !(10..=120).contains(&self.frame_ms) {
            bail!("--frame-ms must be between 10 and 120, got {}", self.frame_ms);
        }
        if self.settle_ms > 5_000 {
            bail!("--settle-ms must be at most 5000, got {}", self.settle_ms);
        }
        if !(10..=10_000).contains(&self.probe_timeout_ms) {
            bail!(
                "--probe-timeout-ms must be between 10 and 10000, got {}",
                self.probe_timeout_ms
            );
        }
        if !self.silence_threshold.is_finite() || self.silence_threshold <= 0.0 {
            bail!(
                "--silence-threshold must be a positive RMS level, got {}",
                self.silence_threshold
            );
        }
        if self.max_recording_ms < self.frame_ms
            || self.max_recording_ms > MAX_RECORDING_HARD_LIMIT_MS
        {
            bail!(
                "--max-recording-ms must be between --frame-ms ({}) and {MAX_RECORDING_HARD_LIMIT_MS}, got {}",
                self.frame_ms,
                self.max_recording_ms
            );
        }
        if self.end_silence_ms > self.max_recording_ms {
            bail!(
                "--end-silence-ms ({}) cannot exceed --max-recording-ms ({})",
                self.end_silence_ms,
                self.max_recording_ms
            );
        }
        if self.min_speech_ms > self.max_recording_ms {
            bail!(
                "--min-speech-ms ({}) cannot exceed --max-recording-ms ({})",
                self.min_speech_ms,
                self.max_recording_ms
            );
        }
        if self.max_wall_ms < self.max_recording_ms {
            bail!(
                "--max-wall-ms ({}) must be at least --max-recording-ms ({})",
                self.max_wall_ms,
                self.max_recording_ms
            );
        }
        if !(0.25..=4.0).contains(&self.tts_speed) {
            bail!(
                "--tts-speed must be between 0.25 and 4.0, got {}",
                self.tts_speed
            );
        }
        if !(8_000..=96_000).contains(&self.tts_sample_rate) {
            bail!(
                "--tts-sample-rate must be between 8000 and 96000 Hz, got {}",
                self.tts_sample_rate
            );
        }
        if self.llm_timeout_ms == 0 {
            bail!("--llm-timeout-ms must be positive");
        }
        if self.restart_delay_ms > MAX_LOOP_DELAY_MS || self.error_delay_ms > MAX_LOOP_DELAY_MS {
            bail!("--restart-delay-ms and --error-delay-ms must be at most {MAX_LOOP_DELAY_MS}");
        }

        for (flag, value) in [
            ("--capture-cmd", &self.capture_cmd),
            ("--playback-cmd", &self.playback_cmd),
            ("--whisper-cmd", &self.whisper_cmd),
            ("--tts-cmd", &self.tts_cmd),
        ] {
            CommandLine::parse(value).with_context(|| format!("{flag} is not a usable command"))?;
        }

        if let Some(device) = &self.input_device {
            // Passed as a single argv entry, but keep it printable.
            if device.trim().is_empty() || device.len() > 256 || device.chars().any(char::is_control)
            {
                bail!("--input-device must be 1-256 printable characters");
            }
        }

        self.lang = self.lang.trim().to_string();
        if self.lang.is_empty() {
            bail!("--lang must not be empty");
        }
        if !self.lang.eq_ignore_ascii_case("auto") {
            if !self
                .lang
                .chars()
                .all(|ch| ch.is_ascii_alphabetic() || ch == '-' || ch == '_')
            {
                bail!("--lang must contain only alphabetic characters or '-'/'_' separators");
            }
            let primary = self
                .lang
                .split(['-', '_'])
                .next()
                .unwrap_or("")
                .to_ascii_lowercase();
            if !ISO_639_1_CODES.contains(&primary.as_str()) {
                bail!(
                    "--lang must start with a valid ISO-639-1 code or be 'auto', got '{}'",
                    self.lang
                );
            }
        }

        let url = self.ollama_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("--ollama-url must start with http:// or https://, got '{url}'");
        }
        self.ollama_url = url.trim_end_matches('/').to_string();

        if self.llm_model.trim().is_empty() {
            bail!("--llm-model must not be empty");
        }
        if self.tts_voice.trim().is_empty() {
            bail!("--tts-voice must not be empty");
        }
        if self.user_id.trim().is_empty() || self.device_id.trim().is_empty() {
            bail!("--user-id and --device-id must not be empty");
        }
        if let Some(prompt) = &self.system_prompt {
            if prompt.trim().is_empty() {
                bail!("--system-prompt must not be empty when given");
            }
        }

        Ok(())
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            silence_threshold: self.silence_threshold,
            end_silence_ms: self.end_silence_ms,
            min_speech_ms: self.min_speech_ms,
            frame_ms: self.frame_ms,
        }
    }

    /// Snapshot the capture settings for a recording session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            preferred: (self.sample_rate, self.channels),
            fallbacks: FALLBACK_FORMATS.to_vec(),
            vad: self.vad_config(),
            max_recording_ms: self.max_recording_ms,
            max_wall_ms: self.max_wall_ms,
            min_clip_bytes: self.min_clip_bytes,
            settle_ms: self.settle_ms,
            probe_timeout_ms: self.probe_timeout_ms,
        }
    }

    pub fn conversation_config(&self, session_id: String) -> ConversationConfig {
        ConversationConfig {
            session_id,
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            error_delay: Duration::from_millis(self.error_delay_ms),
        }
    }

    pub fn capture_command(&self) -> Result<CommandLine> {
        CommandLine::parse(&self.capture_cmd)
    }

    pub fn playback_command(&self) -> Result<CommandLine> {
        CommandLine::parse(&self.playback_cmd)
    }

    pub fn whisper_command(&self) -> Result<CommandLine> {
        CommandLine::parse(&self.whisper_cmd)
    }

    pub fn tts_command(&self) -> Result<CommandLine> {
        CommandLine::parse(&self.tts_cmd)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }
}
