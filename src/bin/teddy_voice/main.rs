//! teddy-voice entrypoint: listen for one utterance, transcribe it, ask the
//! language model for a reply, and speak it back. Repeats until Ctrl+C or the
//! stop button.

mod console;

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::panic;
use teddy_voice::audio::{ProcessCaptureLauncher, ProcessPlaybackLauncher, RecordingSession};
use teddy_voice::config::AppConfig;
use teddy_voice::conversation::{Conversation, Services};
use teddy_voice::events::{EventSink, JsonlEventSink, NullEventSink};
use teddy_voice::reply::OllamaResponder;
use teddy_voice::stop::interrupt::{install_interrupt_handler, InterruptFlag};
use teddy_voice::stop::{AnyStop, GpioButton};
use teddy_voice::stt::{write_wav, AudioClip, CommandTranscriber};
use teddy_voice::tts::CommandSynthesizer;
use teddy_voice::{init_logging, init_tracing, log_debug, log_file_path, log_panic};
use uuid::Uuid;

use crate::console::Console;

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(&config);
    init_tracing(&config);
    install_panic_hook();
    log_debug("=== teddy-voice started ===");
    log_debug(&format!("log file: {}", log_file_path().display()));

    install_interrupt_handler().context("failed to install the Ctrl+C handler")?;

    let mut console = Console::new(std::io::stdout().is_terminal());
    let stop = build_stop(&config, &mut console);

    if config.record_once {
        return record_once(&config, &stop, &mut console);
    }

    let session_id = Uuid::new_v4().simple().to_string();
    let services = build_services(&config)?;
    let mut conversation = Conversation::new(
        config.session_config(),
        config.conversation_config(session_id.clone()),
        services,
    );

    console.banner(&session_id, &config.user_id);
    tracing::info!(session_id = %session_id, user_id = %config.user_id, "conversation started");
    let summary = conversation.run(&stop, &mut console);
    tracing::info!(
        turns = summary.turns,
        replies = summary.replies,
        "conversation stopped"
    );
    log_debug(&format!(
        "conversation stopped after {} turns ({} replies)",
        summary.turns, summary.replies
    ));
    console.goodbye(summary);
    Ok(())
}

fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log_panic(info);
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        log_debug(&format!("panic at {location}"));
        previous(info);
    }));
}

/// Ctrl+C always stops; the GPIO button joins in when configured and readable.
fn build_stop(config: &AppConfig, console: &mut Console) -> AnyStop {
    let mut stop = AnyStop::new();
    stop.push(InterruptFlag);
    if let Some(pin) = config.stop_button_gpio {
        match GpioButton::open(&config.gpio_root, pin, true) {
            Ok(button) => {
                log_debug(&format!("stop button on gpio{pin}"));
                stop.push(button);
            }
            Err(err) => {
                log_debug(&format!("stop button gpio{pin} unavailable: {err}"));
                console.warn(&format!(
                    "stop button on gpio{pin} unavailable ({err}); use Ctrl+C to stop"
                ));
            }
        }
    }
    stop
}

fn build_services(config: &AppConfig) -> Result<Services> {
    let events: Box<dyn EventSink> = match &config.events_log {
        Some(path) => Box::new(
            JsonlEventSink::open(path)
                .with_context(|| format!("failed to open events log {}", path.display()))?,
        ),
        None => Box::new(NullEventSink),
    };
    let transcriber = CommandTranscriber::new(
        config.whisper_command()?,
        config.whisper_model.clone(),
        config.lang.clone(),
        config.clip_path.clone(),
    );
    log_debug(&format!("whisper threads: {}", transcriber.threads()));
    Ok(Services {
        capture: Box::new(ProcessCaptureLauncher::new(
            config.capture_command()?,
            config.input_device.clone(),
        )),
        transcriber: Box::new(transcriber),
        responder: Box::new(OllamaResponder::new(
            &config.ollama_url,
            &config.llm_model,
            config.llm_timeout(),
        )?),
        synthesizer: Box::new(CommandSynthesizer::new(
            config.tts_command()?,
            config.tts_voice.clone(),
            config.tts_speed,
            config.tts_sample_rate,
        )),
        player: Box::new(ProcessPlaybackLauncher::new(config.playback_command()?)),
        events,
    })
}

/// Record a single utterance, report the capture metrics, and keep the clip.
fn record_once(config: &AppConfig, stop: &AnyStop, console: &mut Console) -> Result<()> {
    let mut launcher =
        ProcessCaptureLauncher::new(config.capture_command()?, config.input_device.clone());
    let session = RecordingSession::new(config.session_config());
    let result = session
        .record(&mut launcher, stop, &mut *console)
        .context("recording failed")?;

    let saved = match &result.audio {
        Some(pcm) => {
            let clip = AudioClip {
                pcm,
                sample_rate_hz: result.sample_rate_hz,
                channel_count: result.channel_count,
            };
            write_wav(&config.clip_path, &clip)?;
            Some(config.clip_path.display().to_string())
        }
        None => None,
    };
    console.recording_report(&result, saved.as_deref());
    Ok(())
}
