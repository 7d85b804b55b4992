use serde::{Deserialize, Serialize};

/// Configuration for the audio pipeline and its inference workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the Silero VAD ONNX model.
    pub vad_model_path: String,
    /// Path to the SenseVoice ASR ONNX model.
    pub asr_model_path: String,
    /// Path to the SenseVoice token table.
    pub asr_tokens_path: String,
    /// Path to the CAM++ speaker embedding ONNX model.
    pub embedding_model_path: String,
    pub asr_num_threads: usize,
    pub embedding_num_threads: usize,
    /// Number of pipeline workers. 0 = one per CPU core.
    pub pool_size: usize,
    /// Target sample rate for the whole pipeline.
    pub sample_rate: u32,
    /// Minimum utterance duration in seconds.
    pub min_audio_secs: f64,
    /// Maximum utterance duration in seconds.
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
    /// Clamp each slice at the next digit's start instead of overlapping.
    pub segment_no_overlap: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vad_model_path: "models/silero_vad.onnx".to_string(),
            asr_model_path: "models/sense_voice.int8.onnx".to_string(),
            asr_tokens_path: "models/tokens.txt".to_string(),
            embedding_model_path: "models/campplus_sv_16k.onnx".to_string(),
            asr_num_threads: 2,
            embedding_num_threads: 1,
            pool_size: 0,
            sample_rate: 16000,
            min_audio_secs: 1.0,
            max_audio_secs: 10.0,
            vad_start_threshold: 0.5,
            vad_end_threshold: 0.35,
            vad_min_speech_frames: 3,
            vad_min_silence_frames: 15,
            segment_padding_secs: 0.10,
            segment_no_overlap: false,
        }
    }
}
