pub mod mongo;

pub use mongo::MongoGalleryStore;

use std::collections::HashMap;

use async_trait::async_trait;
use koegate_db::models::PinDigest;
use thiserror::Error;

/// All ten digits a committed gallery must cover.
pub const GALLERY_DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("speaker not found")]
    SpeakerNotFound,
    #[error("speaker already exists")]
    SpeakerAlreadyExists,
    #[error("PIN not set")]
    PinNotSet,
    #[error("gallery invariant violated: {0}")]
    Invariant(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// A speaker's gallery as loaded for verification.
#[derive(Debug, Clone)]
pub struct SpeakerGallery {
    pub speaker_id: String,
    pub speaker_name: Option<String>,
    pub has_pin: bool,
    /// digit -> unit centroid, exactly one entry per digit 0-9.
    pub centroids: HashMap<String, Vec<f32>>,
}

/// Everything needed to commit a new speaker.
#[derive(Debug, Clone)]
pub struct NewSpeaker {
    pub speaker_id: String,
    pub speaker_name: Option<String>,
    pub pin: Option<PinDigest>,
    /// digit -> unit centroid, must cover all ten digits.
    pub centroids: HashMap<String, Vec<f32>>,
}

/// Persistent per-speaker, per-digit centroid gallery.
///
/// `commit` is atomic: the speaker and all ten centroids appear together
/// or not at all. A failed commit must not mutate the gallery.
#[async_trait]
pub trait GalleryStore: Send + Sync {
    async fn exists(&self, speaker_id: &str) -> Result<bool, GalleryError>;

    async fn commit(&self, speaker: NewSpeaker) -> Result<(), GalleryError>;

    async fn load(&self, speaker_id: &str) -> Result<SpeakerGallery, GalleryError>;

    /// Constant-time comparison of the salted digest derived from `pin`
    /// against the stored one.
    async fn verify_pin(&self, speaker_id: &str, pin: &str) -> Result<bool, GalleryError>;
}

/// Checks that a centroid map covers all ten digits with equal dimensions.
pub(crate) fn validate_centroids(
    centroids: &HashMap<String, Vec<f32>>,
) -> Result<(), GalleryError> {
    if centroids.len() != GALLERY_DIGITS.len() {
        return Err(GalleryError::Invariant(format!(
            "expected {} centroids, got {}",
            GALLERY_DIGITS.len(),
            centroids.len()
        )));
    }
    let mut dim: Option<usize> = None;
    for digit in GALLERY_DIGITS {
        let centroid = centroids
            .get(digit)
            .ok_or_else(|| GalleryError::Invariant(format!("missing centroid for '{digit}'")))?;
        if centroid.is_empty() {
            return Err(GalleryError::Invariant(format!(
                "empty centroid for '{digit}'"
            )));
        }
        match dim {
            None => dim = Some(centroid.len()),
            Some(d) if d != centroid.len() => {
                return Err(GalleryError::Invariant(format!(
                    "centroid dimension mismatch: {} vs {}",
                    d,
                    centroid.len()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
