//! The audio-processing pipeline behind every session:
//! decode -> duration gate -> VAD -> ASR -> segmentation -> embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::asr::{digits, AsrEngine};
use crate::config::EngineConfig;
use crate::decoder::AudioDecoder;
use crate::embedding::{cosine_similarity, l2_normalize, EmbeddingExtractor};
use crate::error::EngineError;
use crate::segment;
use crate::vad::VadGate;

/// Outcome of processing one enrollment set.
#[derive(Debug, Clone)]
pub struct EnrollmentAudio {
    /// Raw recognized text.
    pub asr_text: String,
    /// Canonical digit string (equals the prompt on success).
    pub digits: String,
    /// One L2-normalized embedding per prompted digit, in prompt order.
    /// A digit occurring twice in the prompt yields two entries.
    pub embeddings: Vec<(String, Vec<f32>)>,
}

/// Outcome of scoring one verification utterance.
#[derive(Debug, Clone)]
pub struct VerifyAudio {
    pub asr_text: String,
    pub digits: String,
    pub asr_matched: bool,
    /// Per-slice cosine scores against the gallery, in prompt order.
    /// Empty when the ASR did not match.
    pub slice_scores: Vec<(String, f32)>,
}

/// Capability interface over the whole pipeline, as seen by the session
/// state machines. The production implementation is [`crate::InferencePool`];
/// tests supply deterministic fakes.
#[async_trait]
pub trait AudioProcessor: Send + Sync {
    /// Decode, gate, recognize, and embed one enrollment utterance.
    ///
    /// Fails with [`EngineError::PromptMismatch`] when the recognized digit
    /// string differs from `expected_prompt`.
    async fn process_enrollment_audio(
        &self,
        audio: Vec<u8>,
        expected_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrollmentAudio, EngineError>;

    /// Decode, gate, recognize, and score one verification utterance
    /// against `gallery` (digit -> unit centroid).
    async fn verify_audio(
        &self,
        audio: Vec<u8>,
        expected_prompt: &str,
        gallery: &HashMap<String, Vec<f32>>,
        cancel: &CancellationToken,
    ) -> Result<VerifyAudio, EngineError>;
}

/// One pipeline worker owning its own (non-thread-safe) inference handles.
///
/// Checked out of the [`crate::InferencePool`] for the duration of a single
/// utterance; all methods are synchronous and CPU-bound.
pub struct PipelineWorker {
    decoder: Box<dyn AudioDecoder>,
    vad: Box<dyn VadGate>,
    asr: Box<dyn AsrEngine>,
    extractor: Box<dyn EmbeddingExtractor>,
    config: EngineConfig,
}

impl PipelineWorker {
    pub fn new(
        decoder: Box<dyn AudioDecoder>,
        vad: Box<dyn VadGate>,
        asr: Box<dyn AsrEngine>,
        extractor: Box<dyn EmbeddingExtractor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            decoder,
            vad,
            asr,
            extractor,
            config,
        }
    }

    /// Shared front of both flows: decode -> duration gate -> VAD -> ASR.
    ///
    /// Returns the decoded PCM and the recognition result. The PCM is the
    /// full decoded buffer; slicing works on original timestamps.
    fn run_front(
        &mut self,
        blob: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(Vec<f32>, crate::asr::AsrResult), EngineError> {
        checkpoint(cancel)?;
        let pcm = self.decoder.decode(blob)?;

        let duration = pcm.len() as f64 / self.config.sample_rate as f64;
        if duration < self.config.min_audio_secs {
            return Err(EngineError::InvalidAudio(format!(
                "audio too short: {:.2}s < {:.2}s",
                duration, self.config.min_audio_secs
            )));
        }
        if duration > self.config.max_audio_secs {
            return Err(EngineError::InvalidAudio(format!(
                "audio too long: {:.2}s > {:.2}s",
                duration, self.config.max_audio_secs
            )));
        }

        checkpoint(cancel)?;
        let span = self.vad.detect(&pcm)?;
        if span.is_none() {
            return Err(EngineError::InvalidAudio(
                "no speech detected".to_string(),
            ));
        }

        checkpoint(cancel)?;
        let asr = self.asr.recognize(&pcm)?;
        debug!(text = %asr.text, digits = %asr.digits, "pipeline front complete");

        Ok((pcm, asr))
    }

    /// Full enrollment flow for one set.
    pub fn process_enrollment(
        &mut self,
        blob: &[u8],
        expected_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrollmentAudio, EngineError> {
        let (pcm, asr) = self.run_front(blob, cancel)?;

        if asr.digits != expected_prompt {
            return Err(EngineError::PromptMismatch {
                recognized: asr.digits,
            });
        }

        checkpoint(cancel)?;
        let timestamps = digits::digit_timestamps(&asr);
        let slices = segment::segment_by_timestamps(
            &pcm,
            &timestamps,
            expected_prompt,
            self.config.sample_rate,
            self.config.segment_padding_secs,
            self.config.segment_no_overlap,
        )?;

        let mut embeddings = Vec::with_capacity(slices.len());
        for slice in &slices {
            checkpoint(cancel)?;
            let mut embedding = self.extractor.extract(&slice.samples)?;
            l2_normalize(&mut embedding);
            embeddings.push((slice.digit.clone(), embedding));
        }

        Ok(EnrollmentAudio {
            asr_text: asr.text,
            digits: asr.digits,
            embeddings,
        })
    }

    /// Full verification flow for one challenge utterance.
    pub fn process_verification(
        &mut self,
        blob: &[u8],
        expected_prompt: &str,
        gallery: &HashMap<String, Vec<f32>>,
        cancel: &CancellationToken,
    ) -> Result<VerifyAudio, EngineError> {
        let (pcm, asr) = self.run_front(blob, cancel)?;

        if asr.digits != expected_prompt {
            return Ok(VerifyAudio {
                asr_text: asr.text,
                digits: asr.digits,
                asr_matched: false,
                slice_scores: Vec::new(),
            });
        }

        checkpoint(cancel)?;
        let timestamps = digits::digit_timestamps(&asr);
        let slices = segment::segment_by_timestamps(
            &pcm,
            &timestamps,
            expected_prompt,
            self.config.sample_rate,
            self.config.segment_padding_secs,
            self.config.segment_no_overlap,
        )?;

        let mut slice_scores = Vec::with_capacity(slices.len());
        for slice in &slices {
            checkpoint(cancel)?;
            let centroid = gallery.get(&slice.digit).ok_or_else(|| {
                EngineError::Internal(format!("gallery has no centroid for '{}'", slice.digit))
            })?;

            let mut embedding = self.extractor.extract(&slice.samples)?;
            // Dimensionality is fixed at enrollment; a mismatch here means
            // the extractor and the stored gallery disagree.
            if embedding.len() != centroid.len() {
                return Err(EngineError::Internal(format!(
                    "embedding dimension {} does not match stored centroid {}",
                    embedding.len(),
                    centroid.len()
                )));
            }
            l2_normalize(&mut embedding);
            slice_scores.push((slice.digit.clone(), cosine_similarity(&embedding, centroid)));
        }

        Ok(VerifyAudio {
            asr_text: asr.text,
            digits: asr.digits,
            asr_matched: true,
            slice_scores,
        })
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}
