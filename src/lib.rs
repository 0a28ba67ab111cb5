pub mod app;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod process;
pub mod reply;
pub mod stop;
pub mod stt;
pub mod telemetry;
pub mod tts;

pub use app::{init_logging, log_debug, log_debug_content, log_file_path, log_panic};
pub use telemetry::init_tracing;
