//! Terminal status lines for the conversation loop.
//!
//! One line per phase, colored when stdout is a terminal, plus a live level
//! meter while listening that redraws in place.

use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::{Print, Stylize},
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};
use std::time::{Duration, Instant};
use teddy_voice::audio::{level_blocks, CaptureObserver, SessionResult};
use teddy_voice::conversation::{ConversationObserver, ConversationSummary, TurnOutcome};
use teddy_voice::reply::ReplyOutcome;

const METER_BLOCKS: usize = 20;
const METER_REFRESH: Duration = Duration::from_millis(80);

pub struct Console {
    color: bool,
    meter_active: bool,
    last_meter: Option<Instant>,
    out: io::Stdout,
}

impl Console {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            meter_active: false,
            last_meter: None,
            out: io::stdout(),
        }
    }

    pub fn banner(&mut self, session_id: &str, user_id: &str) {
        let title = format!("TedTalks voice companion v{}", env!("CARGO_PKG_VERSION"));
        let title = if self.color {
            title.cyan().bold().to_string()
        } else {
            title
        };
        self.line(&title);
        self.line(&format!("user={user_id}  session={session_id}  (Ctrl+C to stop)"));
    }

    pub fn warn(&mut self, msg: &str) {
        let text = format!("warning: {msg}");
        let text = if self.color {
            text.yellow().to_string()
        } else {
            text
        };
        self.line(&text);
    }

    pub fn goodbye(&mut self, summary: ConversationSummary) {
        self.line(&format!(
            "Stopped after {} turn(s), {} answered. Bye!",
            summary.turns, summary.replies
        ));
    }

    pub fn recording_report(&mut self, result: &SessionResult, saved_to: Option<&str>) {
        let metrics = &result.metrics;
        self.line(&format!(
            "stop={} capture_ms={} speech_ms={} frames={} format={}Hz/{}ch bytes={}",
            metrics.stop_reason.label(),
            metrics.capture_ms,
            metrics.speech_ms,
            metrics.frames_processed,
            result.sample_rate_hz,
            result.channel_count,
            result.audio.as_ref().map_or(0, Vec::len),
        ));
        if let Some(path) = saved_to {
            self.line(&format!("saved {path}"));
        }
    }

    fn status(&mut self, label: &str, paint: fn(&str) -> String) {
        let text = if self.color {
            paint(label)
        } else {
            label.to_string()
        };
        self.line(&text);
    }

    fn line(&mut self, text: &str) {
        self.clear_meter();
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }

    fn clear_meter(&mut self) {
        if self.meter_active {
            let _ = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine));
            self.meter_active = false;
        }
    }

    fn draw_level(&mut self, rms: f32) {
        if !self.color {
            return;
        }
        let now = Instant::now();
        if self
            .last_meter
            .is_some_and(|last| now.duration_since(last) < METER_REFRESH)
        {
            return;
        }
        self.last_meter = Some(now);
        let filled = level_blocks(rms, METER_BLOCKS);
        let bar = format!(
            "{}{}",
            "#".repeat(filled).green(),
            ".".repeat(METER_BLOCKS - filled).dark_grey()
        );
        let _ = queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(format!("  level [{bar}] {rms:>6.0}"))
        );
        let _ = self.out.flush();
        self.meter_active = true;
    }
}

fn red(text: &str) -> String {
    text.red().bold().to_string()
}

fn yellow(text: &str) -> String {
    text.yellow().to_string()
}

fn green(text: &str) -> String {
    text.green().to_string()
}

fn cyan(text: &str) -> String {
    text.cyan().to_string()
}

fn dim(text: &str) -> String {
    text.dark_grey().to_string()
}

impl CaptureObserver for Console {
    fn on_level(&mut self, rms: f32) {
        self.draw_level(rms);
    }

    fn on_speech_start(&mut self) {
        self.status("REC  speech detected", red);
    }
}

impl ConversationObserver for Console {
    fn on_listening(&mut self) {
        self.status("Listening...", cyan);
    }

    fn on_level(&mut self, rms: f32) {
        self.draw_level(rms);
    }

    fn on_speech_start(&mut self) {
        self.status("REC  speech detected", red);
    }

    fn on_transcribing(&mut self) {
        self.status("Transcribing...", yellow);
    }

    fn on_transcript(&mut self, text: &str) {
        self.status(&format!("You: {text}"), cyan);
    }

    fn on_thinking(&mut self) {
        self.status("Thinking...", yellow);
    }

    fn on_reply(&mut self, reply: &ReplyOutcome) {
        self.status(&format!("TedTalks: {}", reply.text()), green);
    }

    fn on_speaking(&mut self) {
        self.status("Speaking...", green);
    }

    fn on_turn_end(&mut self, outcome: &TurnOutcome) {
        match outcome {
            TurnOutcome::NoSpeech => self.status("(nothing heard)", dim),
            TurnOutcome::DeviceUnavailable { attempts } => self.status(
                &format!("No microphone audio after {attempts} attempt(s)"),
                red,
            ),
            TurnOutcome::CaptureFailed(err) => {
                self.status(&format!("Capture failed: {err}"), red)
            }
            TurnOutcome::TranscriptionFailed(err) => {
                self.status(&format!("Transcription failed: {err}"), red)
            }
            TurnOutcome::Replied { spoke: false, .. } => {
                self.status("Could not speak the reply", red)
            }
            TurnOutcome::Interrupted { .. } => self.status("Speech interrupted.", red),
            TurnOutcome::Cancelled => self.status("Stopped.", red),
            TurnOutcome::Replied { .. } => {}
        }
    }

    fn on_pause(&mut self, delay: Duration) {
        self.status(
            &format!("Resuming in {:.1}s...", delay.as_secs_f32()),
            dim,
        );
    }
}
