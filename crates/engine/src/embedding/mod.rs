pub mod campplus;
pub mod fbank;

pub use campplus::CampPlusExtractor;

use crate::error::EngineError;

/// Maps a PCM slice to a fixed-dimension speaker embedding.
///
/// Vectors are raw model output; callers L2-normalize before storage and
/// before comparison. Implementations are not required to be thread-safe:
/// each pipeline worker owns its own extractor.
pub trait EmbeddingExtractor: Send {
    fn extract(&mut self, samples: &[f32]) -> Result<Vec<f32>, EngineError>;

    /// Embedding dimensionality, once known (after the first extraction or
    /// from model metadata).
    fn dimension(&self) -> Option<usize>;
}

/// L2-normalizes a vector to unit length in-place.
///
/// Uses f64 intermediate precision. A zero vector is left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let mut norm: f64 = 0.0;
    for &x in v.iter() {
        norm += (x as f64) * (x as f64);
    }
    norm = norm.sqrt();
    if norm > 0.0 {
        let scale = (1.0 / norm) as f32;
        for x in v.iter_mut() {
            *x *= scale;
        }
    }
}

/// Dot product of two vectors. For L2-normalized inputs this is the cosine
/// similarity, in [-1, 1], with no clamping.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Arithmetic mean of multiple embeddings, L2-normalized.
///
/// Returns `None` when the input is empty or the dimensions disagree.
pub fn centroid(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let dim = first.len();
    if embeddings.iter().any(|e| e.len() != dim) {
        return None;
    }

    let mut mean = vec![0.0f32; dim];
    for e in embeddings {
        for (slot, &v) in mean.iter_mut().zip(e.iter()) {
            *slot += v;
        }
    }
    let n = embeddings.len() as f32;
    for slot in mean.iter_mut() {
        *slot /= n;
    }
    l2_normalize(&mut mean);
    Some(mean)
}
