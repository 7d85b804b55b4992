use thiserror::Error;

/// Errors produced by the audio pipeline.
///
/// Every variant except `Cancelled` and `Internal` is recoverable inside an
/// enrollment session: it counts against the per-set retry budget and is
/// reported to the client without detail.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed container, unsupported codec, or empty input.
    #[error("audio decode failed: {0}")]
    Decode(String),

    /// Duration out of bounds or no speech detected.
    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    /// VAD inference failure.
    #[error("voice activity detection failed: {0}")]
    Vad(String),

    /// ASR inference failure.
    #[error("speech recognition failed: {0}")]
    Asr(String),

    /// The recognized digit string differs from the prompted one.
    #[error("recognized digits do not match the prompt")]
    PromptMismatch {
        /// Digit string the recognizer actually heard.
        recognized: String,
    },

    /// Digit timestamps could not be cut into the expected slices.
    #[error("segmentation failed: {0}")]
    Segmentation(String),

    /// Embedding extraction failure.
    #[error("embedding extraction failed: {0}")]
    Embedding(String),

    /// The session was cancelled while work was in flight.
    #[error("operation cancelled")]
    Cancelled,

    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether an enrollment session may retry the current set after this
    /// error instead of terminating.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineError::Cancelled | EngineError::Internal(_))
    }
}
