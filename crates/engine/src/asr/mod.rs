pub mod digits;
pub mod sense_voice;

pub use sense_voice::SenseVoiceAsr;

use crate::error::EngineError;

/// One recognized token with its time span.
#[derive(Debug, Clone)]
pub struct AsrToken {
    pub token: String,
    /// Seconds from the start of the utterance.
    pub start: f32,
    pub end: f32,
}

/// Result of speech recognition over one utterance.
#[derive(Debug, Clone)]
pub struct AsrResult {
    /// Raw recognized text.
    pub text: String,
    /// Canonical digit string extracted from `text`.
    pub digits: String,
    /// Ordered tokens; starts are non-decreasing and start <= end.
    pub tokens: Vec<AsrToken>,
}

/// Transcribes a 16kHz mono PCM buffer, producing text plus per-token
/// timestamps. Invoked after the VAD gate.
pub trait AsrEngine: Send {
    fn recognize(&mut self, samples: &[f32]) -> Result<AsrResult, EngineError>;
}
