//! Enrollment session state machine.
//!
//! Drives a speaker through five balanced prompt sets, accumulating one
//! embedding per uttered digit, then a PIN step, then an atomic gallery
//! commit. Pipeline failures inside a set count against a per-set retry
//! budget; exhausting it fails the whole session.

use std::collections::HashMap;
use std::sync::Arc;

use koegate_engine::pipeline::AudioProcessor;
use koegate_engine::{EngineError, embedding};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gallery::{GALLERY_DIGITS, GalleryError, GalleryStore, NewSpeaker};
use crate::pin::{PinError, PinHasher};
use crate::prompt::{NUM_SETS, OCCURRENCES_PER_DIGIT, PromptGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    /// Waiting for audio of the current set.
    AwaitingAudio,
    /// All five sets accepted; waiting for the PIN message.
    AwaitingPin,
    /// Commit finished.
    Completed,
    Failed,
}

/// Transient, connection-owned enrollment state.
#[derive(Debug)]
pub struct EnrollmentSession {
    pub speaker_id: String,
    pub speaker_name: Option<String>,
    pub prompts: Vec<String>,
    pub current_set: usize,
    pub retry_count: u32,
    pub state: EnrollmentState,
    /// digit -> embeddings collected so far. After five accepted sets every
    /// digit holds exactly two.
    accumulated: HashMap<String, Vec<Vec<f32>>>,
}

impl EnrollmentSession {
    /// The prompt the client must utter next, while audio is expected.
    pub fn current_prompt(&self) -> Option<&str> {
        self.prompts.get(self.current_set).map(String::as_str)
    }
}

/// Outcome of one audio submission, reported to the client as `asr_result`.
#[derive(Debug, Clone)]
pub struct SetOutcome {
    pub success: bool,
    /// Digit string the recognizer heard (empty when nothing usable).
    pub asr_text: String,
    pub set_index: usize,
    pub remaining_sets: usize,
    pub retry_count: u32,
    pub max_retries: u32,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct EnrollmentComplete {
    pub speaker_id: String,
    pub registered_digits: Vec<String>,
    pub has_pin: bool,
}

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("speaker '{0}' already exists")]
    SpeakerAlreadyExists(String),
    #[error("retry limit ({max_retries}) reached")]
    MaxRetriesExceeded { max_retries: u32 },
    #[error("invalid PIN")]
    InvalidPin,
    #[error("voice enrollment is not complete")]
    NotReady,
    #[error("session cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Store(GalleryError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub struct EnrollmentService {
    processor: Arc<dyn AudioProcessor>,
    store: Arc<dyn GalleryStore>,
    prompts: PromptGenerator,
    hasher: PinHasher,
    max_retries: u32,
}

impl EnrollmentService {
    pub fn new(
        processor: Arc<dyn AudioProcessor>,
        store: Arc<dyn GalleryStore>,
        hasher: PinHasher,
        max_retries: u32,
    ) -> Self {
        Self {
            processor,
            store,
            prompts: PromptGenerator::new(),
            hasher,
            max_retries,
        }
    }

    /// Starts a session: rejects an already-enrolled speaker outright and
    /// issues the balanced prompt schedule.
    pub async fn start(
        &self,
        speaker_id: String,
        speaker_name: Option<String>,
    ) -> Result<EnrollmentSession, EnrollmentError> {
        if self
            .store
            .exists(&speaker_id)
            .await
            .map_err(EnrollmentError::Store)?
        {
            return Err(EnrollmentError::SpeakerAlreadyExists(speaker_id));
        }

        let prompts = self
            .prompts
            .enrollment_prompts()
            .map_err(|e| EnrollmentError::Internal(e.to_string()))?;

        info!(%speaker_id, "enrollment session started");

        Ok(EnrollmentSession {
            speaker_id,
            speaker_name,
            prompts,
            current_set: 0,
            retry_count: 0,
            state: EnrollmentState::AwaitingAudio,
            accumulated: GALLERY_DIGITS
                .iter()
                .map(|d| (d.to_string(), Vec::new()))
                .collect(),
        })
    }

    /// Processes audio for the current set.
    ///
    /// Recoverable pipeline failures burn one retry and keep the same
    /// prompt; exhausting the budget fails the session.
    pub async fn process_audio(
        &self,
        session: &mut EnrollmentSession,
        audio: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<SetOutcome, EnrollmentError> {
        if session.state != EnrollmentState::AwaitingAudio {
            return Err(EnrollmentError::Internal(
                "audio received outside the recording phase".to_string(),
            ));
        }
        let expected = session
            .current_prompt()
            .ok_or_else(|| EnrollmentError::Internal("prompt index out of range".to_string()))?
            .to_string();

        match self
            .processor
            .process_enrollment_audio(audio, &expected, cancel)
            .await
        {
            Ok(result) => {
                for (digit, embedding) in result.embeddings {
                    session
                        .accumulated
                        .entry(digit)
                        .or_default()
                        .push(embedding);
                }

                let set_index = session.current_set;
                session.current_set += 1;
                session.retry_count = 0;

                let remaining = NUM_SETS - session.current_set;
                if session.current_set >= NUM_SETS {
                    session.state = EnrollmentState::AwaitingPin;
                }

                Ok(SetOutcome {
                    success: true,
                    asr_text: result.digits,
                    set_index,
                    remaining_sets: remaining,
                    retry_count: 0,
                    max_retries: self.max_retries,
                    message: if remaining > 0 {
                        "OK! 次へ進みます".to_string()
                    } else {
                        "音声登録完了! PINを設定してください".to_string()
                    },
                })
            }
            Err(EngineError::Cancelled) => Err(EnrollmentError::Cancelled),
            Err(e) if !e.is_retryable() => {
                session.state = EnrollmentState::Failed;
                Err(EnrollmentError::Internal(e.to_string()))
            }
            Err(e) => {
                session.retry_count += 1;
                warn!(
                    speaker_id = %session.speaker_id,
                    set = session.current_set,
                    retry = session.retry_count,
                    %e,
                    "enrollment set rejected"
                );

                if session.retry_count >= self.max_retries {
                    session.state = EnrollmentState::Failed;
                    return Err(EnrollmentError::MaxRetriesExceeded {
                        max_retries: self.max_retries,
                    });
                }

                let heard = match e {
                    EngineError::PromptMismatch { recognized } => recognized,
                    _ => String::new(),
                };

                Ok(SetOutcome {
                    success: false,
                    asr_text: heard,
                    set_index: session.current_set,
                    remaining_sets: NUM_SETS - session.current_set,
                    retry_count: session.retry_count,
                    max_retries: self.max_retries,
                    message: "聞き取れませんでした。もう一度、はっきりとお願いします".to_string(),
                })
            }
        }
    }

    /// Finishes the session: validates the accumulators, derives the PIN
    /// digest, and commits speaker + centroids atomically.
    ///
    /// `pin` is optional; `None` enrolls without a fallback factor.
    pub async fn complete(
        &self,
        session: &mut EnrollmentSession,
        pin: Option<&str>,
    ) -> Result<EnrollmentComplete, EnrollmentError> {
        if session.state != EnrollmentState::AwaitingPin {
            return Err(EnrollmentError::NotReady);
        }

        let pin_digest = match pin {
            Some(pin) => Some(self.hasher.digest(pin).map_err(|e| match e {
                PinError::InvalidPin => EnrollmentError::InvalidPin,
                PinError::UnsupportedAlgorithm(msg) => EnrollmentError::Internal(msg),
            })?),
            None => None,
        };

        let centroids = compute_centroids(&session.accumulated)?;

        let speaker = NewSpeaker {
            speaker_id: session.speaker_id.clone(),
            speaker_name: session.speaker_name.clone(),
            pin: pin_digest.clone(),
            centroids,
        };

        match self.store.commit(speaker).await {
            Ok(()) => {
                session.state = EnrollmentState::Completed;
                info!(
                    speaker_id = %session.speaker_id,
                    has_pin = pin_digest.is_some(),
                    "enrollment committed"
                );
                Ok(EnrollmentComplete {
                    speaker_id: session.speaker_id.clone(),
                    registered_digits: GALLERY_DIGITS.iter().map(|d| d.to_string()).collect(),
                    has_pin: pin_digest.is_some(),
                })
            }
            Err(GalleryError::SpeakerAlreadyExists) => {
                session.state = EnrollmentState::Failed;
                Err(EnrollmentError::SpeakerAlreadyExists(
                    session.speaker_id.clone(),
                ))
            }
            Err(e) => {
                session.state = EnrollmentState::Failed;
                Err(EnrollmentError::Store(e))
            }
        }
    }
}

/// Mean + L2 normalization per digit. Each digit must hold exactly
/// `OCCURRENCES_PER_DIGIT` embeddings, which the balanced schedule
/// guarantees after five accepted sets.
fn compute_centroids(
    accumulated: &HashMap<String, Vec<Vec<f32>>>,
) -> Result<HashMap<String, Vec<f32>>, EnrollmentError> {
    let mut centroids = HashMap::with_capacity(accumulated.len());
    for digit in GALLERY_DIGITS {
        let samples = accumulated
            .get(digit)
            .ok_or_else(|| EnrollmentError::Internal(format!("no accumulator for '{digit}'")))?;
        if samples.len() != OCCURRENCES_PER_DIGIT {
            return Err(EnrollmentError::Internal(format!(
                "digit '{}' has {} embeddings, expected {}",
                digit,
                samples.len(),
                OCCURRENCES_PER_DIGIT
            )));
        }
        let centroid = embedding::centroid(samples).ok_or_else(|| {
            EnrollmentError::Internal(format!("centroid failed for '{digit}'"))
        })?;
        centroids.insert(digit.to_string(), centroid);
    }
    Ok(centroids)
}
