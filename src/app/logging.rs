use crate::config::AppConfig;
use chrono::{SecondsFormat, Utc};
use std::{
    env, fs,
    io::Write,
    panic,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
};

const LOG_MAX_BYTES: u64 = 2 * 1024 * 1024;
const CRASH_LOG_MAX_BYTES: u64 = 128 * 1024;
static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_STATE: OnceLock<Mutex<Option<RotatingLog>>> = OnceLock::new();

/// Debug log in the temp dir; truncated when it outgrows its cap.
pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("teddy_voice.log")
}

/// Panic log (location and version; payload only with --log-content).
pub fn crash_log_path() -> PathBuf {
    env::temp_dir().join("teddy_voice_crash.log")
}

struct RotatingLog {
    path: PathBuf,
    file: fs::File,
    max_bytes: u64,
    len: u64,
}

impl RotatingLog {
    fn open(path: PathBuf, max_bytes: u64) -> Option<Self> {
        let len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let file = if len > max_bytes {
            fs::File::create(&path).ok()?
        } else {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .ok()?
        };
        let len = if len > max_bytes { 0 } else { len };
        Some(Self {
            path,
            file,
            max_bytes,
            len,
        })
    }

    fn append(&mut self, line: &str) {
        let next = self.len.saturating_add(line.len() as u64);
        if next > self.max_bytes {
            if let Ok(file) = fs::File::create(&self.path) {
                self.file = file;
                self.len = 0;
            }
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.len = self.len.saturating_add(line.len() as u64);
        }
    }
}

fn log_state() -> &'static Mutex<Option<RotatingLog>> {
    LOG_STATE.get_or_init(|| Mutex::new(None))
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Enable the debug log when `--logs` or `--log-timings` is set and `--no-logs` is not.
pub fn init_logging(config: &AppConfig) {
    let enabled = config.logging_enabled();
    set_logging(enabled, enabled && config.log_content);
}

fn set_logging(enabled: bool, content_enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    LOG_CONTENT_ENABLED.store(content_enabled, Ordering::Relaxed);
    let mut state = log_state()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *state = if enabled {
        RotatingLog::open(log_file_path(), LOG_MAX_BYTES)
    } else {
        None
    };
}

/// Append one line to the debug log. Never pass transcript or reply text here.
pub fn log_debug(msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let line = format!("[{}] {msg}\n", timestamp());
    let mut state = log_state()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(log) = state.as_mut() {
        log.append(&line);
    }
}

/// Like [`log_debug`], for lines that quote what the child said or heard.
pub fn log_debug_content(msg: &str) {
    if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        log_debug(msg);
    }
}

pub fn log_content_enabled() -> bool {
    LOG_CONTENT_ENABLED.load(Ordering::Relaxed)
}

/// Panic hook body: one line in the crash log when logging is on.
pub fn log_panic(info: &panic::PanicHookInfo<'_>) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "unknown".to_string());
    let payload = if log_content_enabled() {
        info.payload()
            .downcast_ref::<&str>()
            .map(|text| (*text).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string())
    } else {
        "payload omitted".to_string()
    };
    let line = format!(
        "[{}] panic at {location}: {payload} (teddy-voice v{})\n",
        timestamp(),
        env!("CARGO_PKG_VERSION")
    );
    if let Some(mut log) = RotatingLog::open(crash_log_path(), CRASH_LOG_MAX_BYTES) {
        log.append(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotating_log_truncates_past_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("small.log");
        let mut log = RotatingLog::open(path.clone(), 32).expect("open");
        log.append("0123456789012345678901234\n");
        log.append("second line that overflows\n");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "second line that overflows\n");
    }

    #[test]
    fn oversized_log_is_reset_on_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("old.log");
        fs::write(&path, "x".repeat(100)).expect("write");
        let mut log = RotatingLog::open(path.clone(), 50).expect("open");
        log.append("fresh\n");
        assert_eq!(fs::read_to_string(&path).expect("read"), "fresh\n");
    }

    #[test]
    fn log_content_alone_does_not_enable_content_logging() {
        use clap::Parser;
        let config = AppConfig::parse_from(["teddy-voice", "--log-content"]);
        init_logging(&config);
        assert!(!log_content_enabled());
        set_logging(false, false);
    }
}
