//! Deterministic stand-ins for the ONNX pipeline and the MongoDB gallery.
//!
//! The fake processor reads its "recognition result" straight out of the
//! audio bytes: a frame is `<digits>` or `<digits>:<voice>`, so a test
//! chooses exactly what the ASR hears and whose voice it is. Two reserved
//! payloads trigger pipeline failures: `SILENCE` (no speech) and `GARBAGE`
//! (decode failure).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use koegate_engine::pipeline::{AudioProcessor, EnrollmentAudio, VerifyAudio};
use koegate_engine::{EngineError, cosine_similarity};
use koegate_services::gallery::{
    GalleryError, GalleryStore, NewSpeaker, SpeakerGallery, GALLERY_DIGITS,
};
use koegate_services::pin::PinHasher;
use tokio_util::sync::CancellationToken;

/// Unit vector identifying a fake voice. Distinct voices are orthogonal,
/// so cross-voice cosine scores are 0 and same-voice scores are 1.
pub fn voice_vec(voice: &str) -> Vec<f32> {
    match voice {
        "alice" => vec![1.0, 0.0],
        "bob" => vec![0.0, 1.0],
        other => {
            // Anything else lands between the axes.
            let bias = (other.len() % 7) as f32 / 7.0;
            let mut v = vec![1.0 - bias, bias];
            let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
            v.iter_mut().for_each(|x| *x /= norm);
            v
        }
    }
}

fn parse_frame(audio: &[u8]) -> Result<(String, String), EngineError> {
    let text = std::str::from_utf8(audio)
        .map_err(|_| EngineError::Decode("not a fake frame".to_string()))?;
    match text {
        "SILENCE" => return Err(EngineError::InvalidAudio("no speech detected".to_string())),
        "GARBAGE" => return Err(EngineError::Decode("malformed container".to_string())),
        _ => {}
    }
    let (digits, voice) = match text.split_once(':') {
        Some((digits, voice)) => (digits, voice),
        None => (text, "alice"),
    };
    Ok((digits.to_string(), voice.to_string()))
}

/// Pipeline fake that echoes planted recognition results.
#[derive(Default)]
pub struct FakeProcessor;

impl FakeProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioProcessor for FakeProcessor {
    async fn process_enrollment_audio(
        &self,
        audio: Vec<u8>,
        expected_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrollmentAudio, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let (digits, voice) = parse_frame(&audio)?;
        if digits != expected_prompt {
            return Err(EngineError::PromptMismatch { recognized: digits });
        }

        let embeddings = expected_prompt
            .chars()
            .map(|d| (d.to_string(), voice_vec(&voice)))
            .collect();

        Ok(EnrollmentAudio {
            asr_text: digits.clone(),
            digits,
            embeddings,
        })
    }

    async fn verify_audio(
        &self,
        audio: Vec<u8>,
        expected_prompt: &str,
        gallery: &HashMap<String, Vec<f32>>,
        cancel: &CancellationToken,
    ) -> Result<VerifyAudio, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let (digits, voice) = parse_frame(&audio)?;
        if digits != expected_prompt {
            return Ok(VerifyAudio {
                asr_text: digits.clone(),
                digits,
                asr_matched: false,
                slice_scores: Vec::new(),
            });
        }

        let embedding = voice_vec(&voice);
        let mut slice_scores = Vec::new();
        for d in expected_prompt.chars() {
            let digit = d.to_string();
            let centroid = gallery.get(&digit).ok_or_else(|| {
                EngineError::Internal(format!("gallery has no centroid for '{digit}'"))
            })?;
            slice_scores.push((digit, cosine_similarity(&embedding, centroid)));
        }

        Ok(VerifyAudio {
            asr_text: digits.clone(),
            digits,
            asr_matched: true,
            slice_scores,
        })
    }
}

/// Processor that parks until its token is cancelled. Lets tests observe
/// that cancellation actually reaches in-flight work, without timing races.
#[derive(Default)]
pub struct BlockingProcessor {
    pub calls: AtomicUsize,
    pub cancellations: AtomicUsize,
}

#[async_trait]
impl AudioProcessor for BlockingProcessor {
    async fn process_enrollment_audio(
        &self,
        _audio: Vec<u8>,
        _expected_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrollmentAudio, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::Cancelled)
    }

    async fn verify_audio(
        &self,
        _audio: Vec<u8>,
        _expected_prompt: &str,
        _gallery: &HashMap<String, Vec<f32>>,
        cancel: &CancellationToken,
    ) -> Result<VerifyAudio, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::Cancelled)
    }
}

/// In-memory gallery with the same commit semantics as the Mongo store.
#[derive(Default)]
pub struct MemoryGallery {
    speakers: Mutex<HashMap<String, NewSpeaker>>,
    pub commits: AtomicUsize,
}

impl MemoryGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a fully enrolled speaker whose every centroid is the given
    /// voice vector.
    pub fn seed(&self, speaker_id: &str, voice: &str, pin: Option<&str>) {
        let hasher = PinHasher::new("sha256").unwrap();
        let centroids = GALLERY_DIGITS
            .iter()
            .map(|d| (d.to_string(), voice_vec(voice)))
            .collect();
        let speaker = NewSpeaker {
            speaker_id: speaker_id.to_string(),
            speaker_name: None,
            pin: pin.map(|p| hasher.digest(p).unwrap()),
            centroids,
        };
        self.speakers
            .lock()
            .unwrap()
            .insert(speaker_id.to_string(), speaker);
    }

    pub fn snapshot(&self, speaker_id: &str) -> Option<NewSpeaker> {
        self.speakers.lock().unwrap().get(speaker_id).cloned()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GalleryStore for MemoryGallery {
    async fn exists(&self, speaker_id: &str) -> Result<bool, GalleryError> {
        Ok(self.speakers.lock().unwrap().contains_key(speaker_id))
    }

    async fn commit(&self, speaker: NewSpeaker) -> Result<(), GalleryError> {
        let mut speakers = self.speakers.lock().unwrap();
        if speakers.contains_key(&speaker.speaker_id) {
            return Err(GalleryError::SpeakerAlreadyExists);
        }
        if speaker.centroids.len() != GALLERY_DIGITS.len() {
            return Err(GalleryError::Invariant(format!(
                "expected {} centroids, got {}",
                GALLERY_DIGITS.len(),
                speaker.centroids.len()
            )));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        speakers.insert(speaker.speaker_id.clone(), speaker);
        Ok(())
    }

    async fn load(&self, speaker_id: &str) -> Result<SpeakerGallery, GalleryError> {
        let speakers = self.speakers.lock().unwrap();
        let speaker = speakers
            .get(speaker_id)
            .ok_or(GalleryError::SpeakerNotFound)?;
        Ok(SpeakerGallery {
            speaker_id: speaker.speaker_id.clone(),
            speaker_name: speaker.speaker_name.clone(),
            has_pin: speaker.pin.is_some(),
            centroids: speaker.centroids.clone(),
        })
    }

    async fn verify_pin(&self, speaker_id: &str, pin: &str) -> Result<bool, GalleryError> {
        let speakers = self.speakers.lock().unwrap();
        let speaker = speakers
            .get(speaker_id)
            .ok_or(GalleryError::SpeakerNotFound)?;
        let stored = speaker.pin.as_ref().ok_or(GalleryError::PinNotSet)?;
        Ok(PinHasher::verify(pin, stored))
    }
}
