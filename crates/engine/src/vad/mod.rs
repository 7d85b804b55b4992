pub mod silero;

pub use silero::SileroVad;

use crate::error::EngineError;

/// Bounding sample range of detected speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSpan {
    pub start: usize,
    pub end: usize,
}

/// Reports whether a PCM buffer contains speech, with the bounding range.
///
/// `None` means no speech; the caller must abort pipeline processing.
pub trait VadGate: Send {
    fn detect(&mut self, samples: &[f32]) -> Result<Option<SpeechSpan>, EngineError>;
}
