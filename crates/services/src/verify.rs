//! Verification session state machine.
//!
//! Issues a random digit challenge and scores the live utterance against
//! the stored gallery. An utterance that fails the content check ends the
//! session; only a correctly uttered challenge whose voiceprint falls
//! short may continue with the PIN fallback.

use std::collections::BTreeMap;
use std::sync::Arc;

use koegate_engine::EngineError;
use koegate_engine::pipeline::AudioProcessor;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gallery::{GalleryError, GalleryStore, SpeakerGallery};
use crate::prompt::PromptGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    AwaitingAudio,
    AwaitingPin,
    Authenticated,
    Failed,
}

/// Transient, connection-owned verification state.
#[derive(Debug)]
pub struct VerifySession {
    pub speaker_id: String,
    pub prompt: String,
    pub state: VerifyState,
    pub can_fallback_to_pin: bool,
    gallery: SpeakerGallery,
}

/// Outcome of one attempt, reported to the client as `verify_result`.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub authenticated: bool,
    pub speaker_id: String,
    pub asr_result: String,
    pub asr_matched: bool,
    pub voice_similarity: Option<f64>,
    pub digit_scores: Option<BTreeMap<String, f64>>,
    pub can_fallback_to_pin: bool,
    pub auth_method: Option<&'static str>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("speaker '{0}' not found")]
    SpeakerNotFound(String),
    #[error("PIN not set")]
    PinNotSet,
    #[error("session cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Store(GalleryError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub struct VerifyService {
    processor: Arc<dyn AudioProcessor>,
    store: Arc<dyn GalleryStore>,
    prompts: PromptGenerator,
    /// Aggregate cosine score required for voice authentication.
    threshold: f64,
    challenge_min: usize,
    challenge_max: usize,
}

impl VerifyService {
    pub fn new(
        processor: Arc<dyn AudioProcessor>,
        store: Arc<dyn GalleryStore>,
        threshold: f64,
        challenge_min: usize,
        challenge_max: usize,
    ) -> Self {
        Self {
            processor,
            store,
            prompts: PromptGenerator::new(),
            threshold,
            challenge_min,
            challenge_max,
        }
    }

    /// Loads the gallery and issues a fresh challenge.
    pub async fn start(&self, speaker_id: String) -> Result<VerifySession, VerifyError> {
        let gallery = match self.store.load(&speaker_id).await {
            Ok(g) => g,
            Err(GalleryError::SpeakerNotFound) => {
                return Err(VerifyError::SpeakerNotFound(speaker_id));
            }
            Err(e) => return Err(VerifyError::Store(e)),
        };

        let prompt = self.prompts.challenge(self.challenge_min, self.challenge_max);
        info!(%speaker_id, length = prompt.len(), "verification session started");

        Ok(VerifySession {
            speaker_id,
            prompt,
            state: VerifyState::AwaitingAudio,
            can_fallback_to_pin: gallery.has_pin,
            gallery,
        })
    }

    /// Scores one utterance of the challenge against the gallery.
    pub async fn verify_voice(
        &self,
        session: &mut VerifySession,
        audio: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<VerifyOutcome, VerifyError> {
        let result = self
            .processor
            .verify_audio(audio, &session.prompt, &session.gallery.centroids, cancel)
            .await;

        let scored = match result {
            Ok(scored) => scored,
            Err(EngineError::Cancelled) => return Err(VerifyError::Cancelled),
            Err(EngineError::Internal(msg)) => {
                session.state = VerifyState::Failed;
                return Err(VerifyError::Internal(msg));
            }
            Err(e) => {
                // Unusable audio never passed the content check; terminal.
                warn!(speaker_id = %session.speaker_id, %e, "verification audio rejected");
                return Ok(self.terminal_failure(
                    session,
                    String::new(),
                    "音声を処理できませんでした",
                ));
            }
        };

        if !scored.asr_matched {
            // Wrong speech content ends the session. The PIN fallback is
            // reserved for a matching utterance whose voiceprint fell short.
            return Ok(self.terminal_failure(
                session,
                scored.digits,
                "発話内容がプロンプトと一致しません",
            ));
        }

        // NaN/Inf contributions count as zero and veto authentication.
        let mut sum = 0.0f64;
        let mut all_finite = true;
        let mut digit_scores = BTreeMap::new();
        for (digit, score) in &scored.slice_scores {
            let score = f64::from(*score);
            let contribution = if score.is_finite() {
                score
            } else {
                all_finite = false;
                0.0
            };
            sum += contribution;
            digit_scores.insert(digit.clone(), contribution);
        }
        let similarity = sum / scored.slice_scores.len().max(1) as f64;

        if all_finite && similarity >= self.threshold {
            session.state = VerifyState::Authenticated;
            info!(
                speaker_id = %session.speaker_id,
                similarity,
                "voice authentication succeeded"
            );
            return Ok(VerifyOutcome {
                authenticated: true,
                speaker_id: session.speaker_id.clone(),
                asr_result: scored.digits,
                asr_matched: true,
                voice_similarity: Some(similarity),
                digit_scores: Some(digit_scores),
                can_fallback_to_pin: false,
                auth_method: Some("voice"),
                message: "認証成功".to_string(),
            });
        }

        Ok(self.low_similarity_failure(session, scored.digits, similarity, digit_scores))
    }

    /// PIN fallback. A wrong PIN keeps the session open for another try.
    pub async fn verify_pin(
        &self,
        session: &mut VerifySession,
        pin: &str,
    ) -> Result<VerifyOutcome, VerifyError> {
        if !session.can_fallback_to_pin || session.state != VerifyState::AwaitingPin {
            session.state = VerifyState::Failed;
            return Ok(VerifyOutcome {
                authenticated: false,
                speaker_id: session.speaker_id.clone(),
                asr_result: String::new(),
                asr_matched: false,
                voice_similarity: None,
                digit_scores: None,
                can_fallback_to_pin: false,
                auth_method: None,
                message: "PIN認証は利用できません".to_string(),
            });
        }

        let matched = match self.store.verify_pin(&session.speaker_id, pin).await {
            Ok(matched) => matched,
            Err(GalleryError::PinNotSet) => {
                session.state = VerifyState::Failed;
                return Err(VerifyError::PinNotSet);
            }
            Err(GalleryError::SpeakerNotFound) => {
                session.state = VerifyState::Failed;
                return Err(VerifyError::SpeakerNotFound(session.speaker_id.clone()));
            }
            Err(e) => {
                session.state = VerifyState::Failed;
                return Err(VerifyError::Store(e));
            }
        };

        if matched {
            session.state = VerifyState::Authenticated;
            info!(speaker_id = %session.speaker_id, "PIN authentication succeeded");
            Ok(VerifyOutcome {
                authenticated: true,
                speaker_id: session.speaker_id.clone(),
                asr_result: String::new(),
                asr_matched: false,
                voice_similarity: None,
                digit_scores: None,
                can_fallback_to_pin: false,
                auth_method: Some("pin"),
                message: "PIN認証成功".to_string(),
            })
        } else {
            Ok(VerifyOutcome {
                authenticated: false,
                speaker_id: session.speaker_id.clone(),
                asr_result: String::new(),
                asr_matched: false,
                voice_similarity: None,
                digit_scores: None,
                can_fallback_to_pin: true,
                auth_method: None,
                message: "PINが一致しません".to_string(),
            })
        }
    }

    /// Failed content check: the utterance never matched the challenge,
    /// so the session ends with no continuation.
    fn terminal_failure(
        &self,
        session: &mut VerifySession,
        asr_result: String,
        message: &str,
    ) -> VerifyOutcome {
        session.state = VerifyState::Failed;
        VerifyOutcome {
            authenticated: false,
            speaker_id: session.speaker_id.clone(),
            asr_result,
            asr_matched: false,
            voice_similarity: None,
            digit_scores: None,
            can_fallback_to_pin: false,
            auth_method: None,
            message: message.to_string(),
        }
    }

    /// Correct speech content but the voiceprint fell short: offer the
    /// PIN fallback when one is registered.
    fn low_similarity_failure(
        &self,
        session: &mut VerifySession,
        asr_result: String,
        similarity: f64,
        digit_scores: BTreeMap<String, f64>,
    ) -> VerifyOutcome {
        session.state = if session.can_fallback_to_pin {
            VerifyState::AwaitingPin
        } else {
            VerifyState::Failed
        };

        VerifyOutcome {
            authenticated: false,
            speaker_id: session.speaker_id.clone(),
            asr_result,
            asr_matched: true,
            voice_similarity: Some(similarity),
            digit_scores: Some(digit_scores),
            can_fallback_to_pin: session.can_fallback_to_pin,
            auth_method: None,
            message: "声紋が一致しません".to_string(),
        }
    }
}
