//! The turn loop: listen, transcribe, reply, record the exchange, speak, pause.
//!
//! Everything outside the audio core is injected through [`Services`], so the
//! loop runs the same against real subprocesses and scripted fakes.

use crate::audio::{
    CaptureLauncher, CaptureObserver, PlaybackController, PlaybackLauncher, PlaybackOutcome,
    RecordingSession, SessionConfig,
};
use crate::error::CaptureError;
use crate::events::{ChatEvent, EventSink};
use crate::log_debug;
use crate::reply::{generate_reply, ReplyOutcome, Responder};
use crate::stop::StopSignal;
use crate::stt::{transcribe_clip, AudioClip, TranscriptOutcome, Transcriber};
use crate::tts::SpeechSynthesizer;
use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep while pausing, so a stop request is seen promptly.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// External collaborators for one conversation.
pub struct Services {
    pub capture: Box<dyn CaptureLauncher>,
    pub transcriber: Box<dyn Transcriber>,
    pub responder: Box<dyn Responder>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    pub player: Box<dyn PlaybackLauncher>,
    pub events: Box<dyn EventSink>,
}

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
    pub system_prompt: String,
    /// Pause after a turn that was answered.
    pub restart_delay: Duration,
    /// Pause after a turn that failed.
    pub error_delay: Duration,
}

/// How a single turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Stop was requested while listening or transcribing.
    Cancelled,
    /// Nothing worth answering was heard.
    NoSpeech,
    /// Capture processes started but none produced audio.
    DeviceUnavailable { attempts: usize },
    /// The capture command could not be started at all.
    CaptureFailed(String),
    TranscriptionFailed(String),
    /// The reply was generated; `spoke` is false when synthesis or playback failed.
    Replied {
        transcript: String,
        reply: ReplyOutcome,
        spoke: bool,
    },
    /// Stop was requested while the reply was being spoken.
    Interrupted {
        transcript: String,
        reply: ReplyOutcome,
    },
}

impl TurnOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Cancelled => "cancelled",
            TurnOutcome::NoSpeech => "no_speech",
            TurnOutcome::DeviceUnavailable { .. } => "device_unavailable",
            TurnOutcome::CaptureFailed(_) => "capture_failed",
            TurnOutcome::TranscriptionFailed(_) => "transcription_failed",
            TurnOutcome::Replied { .. } => "replied",
            TurnOutcome::Interrupted { .. } => "interrupted",
        }
    }

    /// Cancellation and interruption both end the conversation.
    pub fn ends_conversation(&self) -> bool {
        matches!(
            self,
            TurnOutcome::Cancelled | TurnOutcome::Interrupted { .. }
        )
    }

    fn pause_after(&self, cfg: &ConversationConfig) -> Duration {
        match self {
            TurnOutcome::Replied { .. } => cfg.restart_delay,
            TurnOutcome::DeviceUnavailable { .. }
            | TurnOutcome::CaptureFailed(_)
            | TurnOutcome::TranscriptionFailed(_) => cfg.error_delay,
            _ => Duration::ZERO,
        }
    }
}

/// Progress hooks for a front end. All default to no-ops.
pub trait ConversationObserver {
    fn on_listening(&mut self) {}
    fn on_level(&mut self, _rms: f32) {}
    fn on_speech_start(&mut self) {}
    fn on_transcribing(&mut self) {}
    fn on_transcript(&mut self, _text: &str) {}
    fn on_thinking(&mut self) {}
    fn on_reply(&mut self, _reply: &ReplyOutcome) {}
    fn on_speaking(&mut self) {}
    fn on_turn_end(&mut self, _outcome: &TurnOutcome) {}
    fn on_pause(&mut self, _delay: Duration) {}
}

pub struct SilentObserver;

impl ConversationObserver for SilentObserver {}

/// Forwards capture feedback to the conversation observer.
struct CaptureHooks<'a>(&'a mut dyn ConversationObserver);

impl CaptureObserver for CaptureHooks<'_> {
    fn on_level(&mut self, rms: f32) {
        self.0.on_level(rms);
    }

    fn on_speech_start(&mut self) {
        self.0.on_speech_start();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationSummary {
    pub turns: usize,
    pub replies: usize,
}

pub struct Conversation {
    session: RecordingSession,
    playback: PlaybackController,
    services: Services,
    cfg: ConversationConfig,
}

impl Conversation {
    pub fn new(session: SessionConfig, cfg: ConversationConfig, services: Services) -> Self {
        Self {
            session: RecordingSession::new(session),
            playback: PlaybackController::default(),
            services,
            cfg,
        }
    }

    /// Run turns until stop is requested or a turn ends the conversation.
    pub fn run(
        &mut self,
        stop: &dyn StopSignal,
        observer: &mut dyn ConversationObserver,
    ) -> ConversationSummary {
        let mut summary = ConversationSummary::default();
        while !stop.is_raised() {
            let outcome = self.run_turn(stop, observer);
            summary.turns += 1;
            if matches!(outcome, TurnOutcome::Replied { .. }) {
                summary.replies += 1;
            }
            if outcome.ends_conversation() {
                break;
            }
            let delay = outcome.pause_after(&self.cfg);
            if !delay.is_zero() {
                observer.on_pause(delay);
                pause(delay, stop);
            }
        }
        tracing::info!(
            session_id = %self.cfg.session_id,
            turns = summary.turns,
            replies = summary.replies,
            "conversation ended"
        );
        summary
    }

    /// One full listen/answer cycle. Never fails; every ending is a [`TurnOutcome`].
    pub fn run_turn(
        &mut self,
        stop: &dyn StopSignal,
        observer: &mut dyn ConversationObserver,
    ) -> TurnOutcome {
        let started = Instant::now();
        let outcome = self.turn(stop, observer);
        tracing::info!(
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn finished"
        );
        log_debug(&format!(
            "turn|outcome={}|elapsed_ms={}",
            outcome.label(),
            started.elapsed().as_millis()
        ));
        observer.on_turn_end(&outcome);
        outcome
    }

    fn turn(
        &mut self,
        stop: &dyn StopSignal,
        observer: &mut dyn ConversationObserver,
    ) -> TurnOutcome {
        observer.on_listening();
        let recorded = self.session.record(
            self.services.capture.as_mut(),
            stop,
            &mut CaptureHooks(&mut *observer),
        );
        let result = match recorded {
            Ok(result) => result,
            Err(CaptureError::NoDevice { attempts }) => {
                return TurnOutcome::DeviceUnavailable { attempts }
            }
            Err(err) => return TurnOutcome::CaptureFailed(err.to_string()),
        };
        if result.was_cancelled() {
            return TurnOutcome::Cancelled;
        }
        let Some(pcm) = result.audio.as_deref() else {
            return TurnOutcome::NoSpeech;
        };

        observer.on_transcribing();
        let clip = AudioClip {
            pcm,
            sample_rate_hz: result.sample_rate_hz,
            channel_count: result.channel_count,
        };
        let transcript = match transcribe_clip(self.services.transcriber.as_mut(), &clip) {
            TranscriptOutcome::Text(text) => text,
            TranscriptOutcome::NoUsableSpeech => return TurnOutcome::NoSpeech,
            TranscriptOutcome::Failed(reason) => return TurnOutcome::TranscriptionFailed(reason),
        };
        if stop.is_raised() {
            return TurnOutcome::Cancelled;
        }
        observer.on_transcript(&transcript);

        observer.on_thinking();
        let reply = generate_reply(
            self.services.responder.as_mut(),
            &self.cfg.system_prompt,
            &transcript,
        );
        self.record_event(&transcript, reply.text());
        observer.on_reply(&reply);

        observer.on_speaking();
        match self.speak(reply.text(), stop) {
            Some(PlaybackOutcome::Interrupted) => TurnOutcome::Interrupted { transcript, reply },
            Some(PlaybackOutcome::Completed) => TurnOutcome::Replied {
                transcript,
                reply,
                spoke: true,
            },
            None => TurnOutcome::Replied {
                transcript,
                reply,
                spoke: false,
            },
        }
    }

    fn record_event(&mut self, transcript: &str, reply: &str) {
        let event = ChatEvent::chat(
            &self.cfg.user_id,
            &self.cfg.device_id,
            &self.cfg.session_id,
            transcript,
            reply,
        );
        if let Err(err) = self.services.events.record(&event) {
            tracing::warn!(error = %format!("{err:#}"), "failed to record chat event");
            log_debug(&format!("event sink failed: {err:#}"));
        }
    }

    /// `None` when synthesis or playback failed; the turn still counts as answered.
    fn speak(&mut self, text: &str, stop: &dyn StopSignal) -> Option<PlaybackOutcome> {
        let sample_rate = self.services.synthesizer.sample_rate();
        let segments = match self.services.synthesizer.synthesize(text) {
            Ok(segments) => segments,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "speech synthesis failed");
                log_debug(&format!("synthesis failed: {err:#}"));
                return None;
            }
        };
        match self
            .playback
            .play(self.services.player.as_mut(), segments, sample_rate, stop)
        {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(error = %err, "playback failed");
                log_debug(&format!("playback failed: {err}"));
                None
            }
        }
    }
}

/// Sleep for `delay` in short slices; returns false if stop cut it short.
pub fn pause(delay: Duration, stop: &dyn StopSignal) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if stop.is_raised() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioConfig, FrameSource, PlaybackSink};
    use crate::events::ChatEvent;
    use crate::reply::FALLBACK_REPLY;
    use crate::stop::NeverStop;
    use crate::tts::SpeechSegments;
    use anyhow::{anyhow, Result};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Log {
        launches: usize,
        transcribed: usize,
        prompts: Vec<String>,
        events: Vec<ChatEvent>,
        played_bytes: usize,
        player_kills: usize,
    }

    type Shared = Rc<RefCell<Log>>;

    struct Frames(VecDeque<Vec<u8>>);

    impl FrameSource for Frames {
        fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.0.pop_front())
        }

        fn wait_ready(&mut self, _timeout: Duration) -> io::Result<bool> {
            Ok(!self.0.is_empty())
        }

        fn terminate(&mut self) {
            self.0.clear();
        }
    }

    struct Mic {
        log: Shared,
        loud_frames: usize,
        silent: bool,
        raise_on_launch: Option<(usize, Arc<AtomicBool>)>,
    }

    impl CaptureLauncher for Mic {
        fn launch(&mut self, config: &AudioConfig) -> io::Result<Box<dyn FrameSource>> {
            let launches = {
                let mut log = self.log.borrow_mut();
                log.launches += 1;
                log.launches
            };
            if let Some((at, flag)) = &self.raise_on_launch {
                if launches >= *at {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            if self.silent {
                return Ok(Box::new(Frames(VecDeque::new())));
            }
            let frame = |amplitude: i16| -> Vec<u8> {
                (0..config.frame_bytes() / 2)
                    .flat_map(|i| {
                        let s = if i % 2 == 0 { amplitude } else { -amplitude };
                        s.to_le_bytes()
                    })
                    .collect()
            };
            let mut frames = VecDeque::new();
            for _ in 0..self.loud_frames {
                frames.push_back(frame(3_000));
            }
            for _ in 0..25 {
                frames.push_back(frame(10));
            }
            // A quiet leading frame keeps the probe happy when nothing is loud.
            frames.push_front(frame(10));
            Ok(Box::new(Frames(frames)))
        }
    }

    struct Stt {
        log: Shared,
        reply: Result<String, String>,
    }

    impl Transcriber for Stt {
        fn transcribe(&mut self, clip: &AudioClip<'_>) -> Result<String> {
            assert!(clip.pcm.len() > 1_000);
            self.log.borrow_mut().transcribed += 1;
            self.reply.clone().map_err(|msg| anyhow!(msg))
        }
    }

    struct Llm {
        log: Shared,
        reply: Result<String, String>,
    }

    impl Responder for Llm {
        fn respond(&mut self, _system: &str, user_text: &str) -> Result<String> {
            self.log.borrow_mut().prompts.push(user_text.to_string());
            self.reply.clone().map_err(|msg| anyhow!(msg))
        }
    }

    struct Voice {
        fail: bool,
    }

    impl SpeechSynthesizer for Voice {
        fn sample_rate(&self) -> u32 {
            24_000
        }

        fn synthesize<'a>(&'a mut self, _text: &str) -> Result<SpeechSegments<'a>> {
            if self.fail {
                return Err(anyhow!("voice model missing"));
            }
            let segments: Vec<Result<Vec<f32>>> = vec![Ok(vec![0.2; 2_400]), Ok(vec![0.1; 2_400])];
            Ok(Box::new(segments.into_iter()))
        }
    }

    struct Speaker {
        log: Shared,
        stop_after_first_write: Option<Arc<AtomicBool>>,
    }

    struct SpeakerSink {
        log: Shared,
        stop_after_first_write: Option<Arc<AtomicBool>>,
    }

    impl PlaybackLauncher for Speaker {
        fn launch(&mut self, sample_rate: u32) -> io::Result<Box<dyn PlaybackSink>> {
            assert_eq!(sample_rate, 24_000);
            Ok(Box::new(SpeakerSink {
                log: self.log.clone(),
                stop_after_first_write: self.stop_after_first_write.clone(),
            }))
        }
    }

    impl PlaybackSink for SpeakerSink {
        fn write_chunk(&mut self, pcm: &[u8], _timeout: Duration) -> io::Result<usize> {
            if let Some(flag) = &self.stop_after_first_write {
                flag.store(true, Ordering::Relaxed);
            }
            let n = pcm.len().min(4_096);
            self.log.borrow_mut().played_bytes += n;
            Ok(n)
        }

        fn finish_input(&mut self) {}

        fn try_exit(&mut self) -> io::Result<Option<ExitStatus>> {
            Ok(Some(ExitStatus::from_raw(0)))
        }

        fn kill(&mut self) {
            self.log.borrow_mut().player_kills += 1;
        }
    }

    struct Journal {
        log: Shared,
        fail: bool,
    }

    impl EventSink for Journal {
        fn record(&mut self, event: &ChatEvent) -> Result<()> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            self.log.borrow_mut().events.push(event.clone());
            Ok(())
        }
    }

    struct Rig {
        log: Shared,
        loud_frames: usize,
        silent_mic: bool,
        transcript: Result<String, String>,
        reply: Result<String, String>,
        voice_fails: bool,
        journal_fails: bool,
        stop_on_playback: Option<Arc<AtomicBool>>,
        stop_on_launch: Option<(usize, Arc<AtomicBool>)>,
    }

    impl Default for Rig {
        fn default() -> Self {
            Self {
                log: Shared::default(),
                loud_frames: 15,
                silent_mic: false,
                transcript: Ok("tell me a story".to_string()),
                reply: Ok("Once upon a time there was a brave little bear.".to_string()),
                voice_fails: false,
                journal_fails: false,
                stop_on_playback: None,
                stop_on_launch: None,
            }
        }
    }

    impl Rig {
        fn build(&self) -> Conversation {
            let session = SessionConfig {
                settle_ms: 0,
                probe_timeout_ms: 10,
                ..SessionConfig::default()
            };
            let cfg = ConversationConfig {
                session_id: "session-1".to_string(),
                user_id: "child-1".to_string(),
                device_id: "pi-1".to_string(),
                system_prompt: "be kind".to_string(),
                restart_delay: Duration::from_millis(1),
                error_delay: Duration::from_millis(1),
            };
            let services = Services {
                capture: Box::new(Mic {
                    log: self.log.clone(),
                    loud_frames: self.loud_frames,
                    silent: self.silent_mic,
                    raise_on_launch: self.stop_on_launch.clone(),
                }),
                transcriber: Box::new(Stt {
                    log: self.log.clone(),
                    reply: self.transcript.clone(),
                }),
                responder: Box::new(Llm {
                    log: self.log.clone(),
                    reply: self.reply.clone(),
                }),
                synthesizer: Box::new(Voice {
                    fail: self.voice_fails,
                }),
                player: Box::new(Speaker {
                    log: self.log.clone(),
                    stop_after_first_write: self.stop_on_playback.clone(),
                }),
                events: Box::new(Journal {
                    log: self.log.clone(),
                    fail: self.journal_fails,
                }),
            };
            Conversation::new(session, cfg, services)
        }
    }

    #[test]
    fn full_turn_answers_records_and_speaks() {
        let rig = Rig::default();
        let outcome = rig.build().run_turn(&NeverStop, &mut SilentObserver);
        assert_eq!(
            outcome,
            TurnOutcome::Replied {
                transcript: "tell me a story".into(),
                reply: ReplyOutcome::Generated(
                    "Once upon a time there was a brave little bear.".into()
                ),
                spoke: true,
            }
        );
        let log = rig.log.borrow();
        assert_eq!(log.prompts, vec!["tell me a story"]);
        assert_eq!(log.events.len(), 1);
        let event = &log.events[0];
        assert_eq!(event.session_id, "session-1");
        assert_eq!(event.child_text, "tell me a story");
        assert_eq!(event.kind, "CHAT");
        assert_eq!(log.played_bytes, 4_800 * 2);
    }

    #[test]
    fn quiet_room_is_no_speech_without_transcribing() {
        let rig = Rig {
            loud_frames: 0,
            ..Rig::default()
        };
        let outcome = rig.build().run_turn(&NeverStop, &mut SilentObserver);
        assert_eq!(outcome, TurnOutcome::NoSpeech);
        assert_eq!(rig.log.borrow().transcribed, 0);
    }

    #[test]
    fn filler_transcript_is_not_answered() {
        let rig = Rig {
            transcript: Ok("Thank you.".into()),
            ..Rig::default()
        };
        let outcome = rig.build().run_turn(&NeverStop, &mut SilentObserver);
        assert_eq!(outcome, TurnOutcome::NoSpeech);
        assert!(rig.log.borrow().prompts.is_empty());
    }

    #[test]
    fn responder_failure_speaks_fallback_and_records_it() {
        let rig = Rig {
            reply: Err("ollama down".into()),
            ..Rig::default()
        };
        let outcome = rig.build().run_turn(&NeverStop, &mut SilentObserver);
        let TurnOutcome::Replied { reply, spoke, .. } = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert!(reply.is_fallback());
        assert!(spoke);
        assert_eq!(rig.log.borrow().events[0].ai_text, FALLBACK_REPLY);
    }

    #[test]
    fn event_sink_and_synthesis_failures_do_not_abort_turn() {
        let rig = Rig {
            journal_fails: true,
            voice_fails: true,
            ..Rig::default()
        };
        let outcome = rig.build().run_turn(&NeverStop, &mut SilentObserver);
        assert!(matches!(outcome, TurnOutcome::Replied { spoke: false, .. }));
        assert_eq!(rig.log.borrow().played_bytes, 0);
    }

    #[test]
    fn missing_device_and_failed_transcription_are_reported() {
        let rig = Rig {
            silent_mic: true,
            ..Rig::default()
        };
        let outcome = rig.build().run_turn(&NeverStop, &mut SilentObserver);
        assert_eq!(outcome, TurnOutcome::DeviceUnavailable { attempts: 3 });

        let rig = Rig {
            transcript: Err("model missing".into()),
            ..Rig::default()
        };
        let outcome = rig.build().run_turn(&NeverStop, &mut SilentObserver);
        assert!(matches!(outcome, TurnOutcome::TranscriptionFailed(msg) if msg.contains("model missing")));
    }

    #[test]
    fn stop_during_playback_interrupts_and_ends_loop() {
        let stop = Arc::new(AtomicBool::new(false));
        let rig = Rig {
            stop_on_playback: Some(stop.clone()),
            ..Rig::default()
        };
        let summary = rig.build().run(&stop, &mut SilentObserver);
        assert_eq!(summary, ConversationSummary { turns: 1, replies: 0 });
        let log = rig.log.borrow();
        assert_eq!(log.player_kills, 1);
        assert_eq!(log.played_bytes, 4_096);
        assert_eq!(log.events.len(), 1, "the exchange is recorded before speaking");
    }

    #[test]
    fn loop_keeps_going_until_cancelled() {
        let stop = Arc::new(AtomicBool::new(false));
        let rig = Rig {
            loud_frames: 0,
            stop_on_launch: Some((3, stop.clone())),
            ..Rig::default()
        };
        let summary = rig.build().run(&stop, &mut SilentObserver);
        assert_eq!(summary.turns, 3);
        assert_eq!(summary.replies, 0);
        assert_eq!(rig.log.borrow().launches, 3);
    }

    #[test]
    fn raised_stop_runs_no_turns() {
        let rig = Rig::default();
        let summary = rig.build().run(&AtomicBool::new(true), &mut SilentObserver);
        assert_eq!(summary.turns, 0);
        assert_eq!(rig.log.borrow().launches, 0);
    }

    #[derive(Default)]
    struct Trace(Vec<&'static str>);

    impl ConversationObserver for Trace {
        fn on_listening(&mut self) {
            self.0.push("listening");
        }
        fn on_speech_start(&mut self) {
            self.0.push("speech");
        }
        fn on_transcribing(&mut self) {
            self.0.push("transcribing");
        }
        fn on_thinking(&mut self) {
            self.0.push("thinking");
        }
        fn on_speaking(&mut self) {
            self.0.push("speaking");
        }
        fn on_turn_end(&mut self, _outcome: &TurnOutcome) {
            self.0.push("end");
        }
    }

    #[test]
    fn observer_sees_phases_in_order() {
        let rig = Rig::default();
        let mut trace = Trace::default();
        rig.build().run_turn(&NeverStop, &mut trace);
        assert_eq!(
            trace.0,
            vec!["listening", "speech", "transcribing", "thinking", "speaking", "end"]
        );
    }

    #[test]
    fn pause_returns_early_on_stop() {
        let started = Instant::now();
        assert!(!pause(Duration::from_secs(5), &AtomicBool::new(true)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(pause(Duration::from_millis(5), &NeverStop));
    }
}
