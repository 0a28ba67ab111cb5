pub const DEFAULT_CAPTURE_CMD: &str = "parec";
pub const DEFAULT_PLAYBACK_CMD: &str = "pacat";
pub const DEFAULT_WHISPER_CMD: &str = "whisper-cli";
pub const DEFAULT_WHISPER_MODEL: &str = "models/ggml-tiny.en.bin";
pub const DEFAULT_CLIP_PATH: &str = "/tmp/recording.wav";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_LLM_MODEL: &str = "gemma3:270m";
pub const DEFAULT_TTS_CMD: &str = "piper";
pub const DEFAULT_TTS_VOICE: &str = "models/en_US-lessac-medium.onnx";
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

pub const DEFAULT_SETTLE_MS: u64 = 100;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 250.0;
pub const DEFAULT_END_SILENCE_MS: u64 = 600;
pub const DEFAULT_MIN_SPEECH_MS: u64 = 250;
pub const DEFAULT_MAX_RECORDING_MS: u64 = 15_000;
pub const DEFAULT_MAX_WALL_MS: u64 = 20_000;
pub const DEFAULT_MIN_CLIP_BYTES: usize = 1_000;
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_TTS_SAMPLE_RATE: u32 = 22_050;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_500;
pub const DEFAULT_ERROR_DELAY_MS: u64 = 2_000;

/// Upper bound for any single recording, whatever the flags say.
pub const MAX_RECORDING_HARD_LIMIT_MS: u64 = 120_000;
pub const MAX_LOOP_DELAY_MS: u64 = 60_000;

/// Languages whisper.cpp ships tokens for; checked on the primary subtag only.
pub const ISO_639_1_CODES: &[&str] = &[
    "af", "am", "ar", "as", "az", "ba", "be", "bg", "bn", "bo", "br", "bs", "ca", "cs", "cy",
    "da", "de", "el", "en", "es", "et", "eu", "fa", "fi", "fo", "fr", "gl", "gu", "ha", "he",
    "hi", "hr", "ht", "hu", "hy", "id", "is", "it", "ja", "jw", "ka", "kk", "km", "kn", "ko",
    "la", "lb", "ln", "lo", "lt", "lv", "mg", "mi", "mk", "ml", "mn", "mr", "ms", "mt", "my",
    "ne", "nl", "nn", "no", "oc", "pa", "pl", "ps", "pt", "ro", "ru", "sa", "sd", "si", "sk",
    "sl", "sn", "so", "sq", "sr", "su", "sv", "sw", "ta", "te", "tg", "th", "tk", "tl", "tr",
    "tt", "uk", "ur", "uz", "vi", "yi", "yo", "zh",
];
