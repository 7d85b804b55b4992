use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub models: ModelSettings,
    pub engine: EngineSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub name: String,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
}

/// Paths to the ONNX models the audio pipeline loads at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelSettings {
    /// Silero VAD model.
    pub vad_model_path: String,
    /// SenseVoice ASR model.
    pub asr_model_path: String,
    /// SenseVoice token table (`<token> <id>` per line).
    pub asr_tokens_path: String,
    /// CAM++ speaker embedding model.
    pub embedding_model_path: String,
    pub asr_num_threads: usize,
    pub embedding_num_threads: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSettings {
    /// Number of inference workers. 0 = number of CPU cores.
    pub pool_size: usize,
    /// Target sample rate. Fixed at 16 kHz unless the models change.
    pub sample_rate: u32,
    /// Utterances shorter than this are rejected (seconds).
    pub min_audio_secs: f64,
    /// Utterances longer than this are rejected (seconds).
    pub max_audio_secs: f64,
    /// VAD speech start threshold (0.0-1.0).
    pub vad_start_threshold: f32,
    /// VAD speech end threshold (0.0-1.0).
    pub vad_end_threshold: f32,
    /// Consecutive speech frames (32ms each) required to enter speech.
    pub vad_min_speech_frames: usize,
    /// Consecutive silence frames required to leave speech.
    pub vad_min_silence_frames: usize,
    /// Padding added on both sides of each digit slice, in seconds.
    pub segment_padding_secs: f64,
    /// Clamp a slice at the next digit's start instead of overlapping.
    pub segment_no_overlap: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    /// Cosine similarity threshold for voice authentication.
    pub similarity_threshold: f64,
    /// Retries allowed per enrollment set before the session fails.
    pub enrollment_max_retries: u32,
    pub challenge_min_length: usize,
    pub challenge_max_length: usize,
    /// PIN digest algorithm identifier. "sha256" is the only built-in.
    pub pin_algorithm: String,
    /// Seconds of client silence before the session is closed.
    pub idle_timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("KOEGATE"),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 8000)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("database.url", "mongodb://localhost:27017")?
            .set_default("database.name", "koegate")?
            .set_default("models.vad_model_path", "models/silero_vad.onnx")?
            .set_default("models.asr_model_path", "models/sense_voice.int8.onnx")?
            .set_default("models.asr_tokens_path", "models/tokens.txt")?
            .set_default(
                "models.embedding_model_path",
                "models/campplus_sv_16k.onnx",
            )?
            .set_default("models.asr_num_threads", 2)?
            .set_default("models.embedding_num_threads", 1)?
            .set_default("engine.pool_size", 0)?
            .set_default("engine.sample_rate", 16000)?
            .set_default("engine.min_audio_secs", 1.0)?
            .set_default("engine.max_audio_secs", 10.0)?
            .set_default("engine.vad_start_threshold", 0.5)?
            .set_default("engine.vad_end_threshold", 0.35)?
            .set_default("engine.vad_min_speech_frames", 3)?
            .set_default("engine.vad_min_silence_frames", 15)?
            .set_default("engine.segment_padding_secs", 0.10)?
            .set_default("engine.segment_no_overlap", false)?
            .set_default("auth.similarity_threshold", 0.75)?
            .set_default("auth.enrollment_max_retries", 5)?
            .set_default("auth.challenge_min_length", 4)?
            .set_default("auth.challenge_max_length", 6)?
            .set_default("auth.pin_algorithm", "sha256")?
            .set_default("auth.idle_timeout_secs", 60)?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
