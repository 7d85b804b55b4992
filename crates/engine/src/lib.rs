pub mod asr;
pub mod config;
pub mod decoder;
pub mod embedding;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod resampler;
pub mod segment;
pub mod vad;

pub use asr::{AsrEngine, AsrResult, AsrToken};
pub use config::EngineConfig;
pub use decoder::{AudioDecoder, ContainerDecoder};
pub use embedding::{EmbeddingExtractor, cosine_similarity};
pub use error::EngineError;
pub use pipeline::{AudioProcessor, EnrollmentAudio, PipelineWorker, VerifyAudio};
pub use pool::InferencePool;
pub use vad::{SpeechSpan, VadGate};
