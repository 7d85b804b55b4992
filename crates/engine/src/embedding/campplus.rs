use ndarray::Array3;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::error::EngineError;

use super::fbank::{self, FbankConfig};
use super::EmbeddingExtractor;

/// Fewer frames than this and the model has nothing to pool over.
const MIN_FRAMES: usize = 10;

/// CAM++ speaker embedding extractor over ONNX Runtime.
///
/// Front-end: 80-mel log filterbank features, mean-normalized over time.
/// Output: one fixed-dimension vector per utterance (192 for the reference
/// model).
pub struct CampPlusExtractor {
    session: Session,
    fbank: FbankConfig,
    dim: Option<usize>,
}

impl CampPlusExtractor {
    pub fn new(model_path: &str, num_threads: usize) -> anyhow::Result<Self> {
        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("Failed to create ORT session builder: {}", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| anyhow::anyhow!("Failed to set intra threads: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                anyhow::anyhow!("Failed to load embedding model '{}': {}", model_path, e)
            })?;

        info!(model = model_path, "Speaker embedding model loaded");

        Ok(Self {
            session,
            fbank: FbankConfig::default(),
            dim: None,
        })
    }

    fn compute(&mut self, samples: &[f32]) -> anyhow::Result<Vec<f32>> {
        let mut features = fbank::compute_fbank(samples, &self.fbank)
            .ok_or_else(|| anyhow::anyhow!("slice too short for feature extraction"))?;
        if features.len() < MIN_FRAMES {
            anyhow::bail!(
                "slice too short: {} feature frames, need {}",
                features.len(),
                MIN_FRAMES
            );
        }
        fbank::mean_norm(&mut features);

        let num_frames = features.len();
        let num_mels = self.fbank.num_mels;
        let flat: Vec<f32> = features.into_iter().flatten().collect();
        let input = Array3::from_shape_vec((1, num_frames, num_mels), flat)
            .map_err(|e| anyhow::anyhow!("feature shape error: {}", e))?;
        let input_val = Tensor::from_array(input)
            .map_err(|e| anyhow::anyhow!("input tensor error: {}", e))?;

        let outputs = self
            .session
            .run(ort::inputs!["x" => input_val])
            .map_err(|e| anyhow::anyhow!("embedding inference error: {}", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow::anyhow!("output extraction error: {}", e))?;

        let dim = *shape.last().unwrap_or(&0) as usize;
        if dim == 0 || data.len() < dim {
            anyhow::bail!("unexpected embedding output shape {:?}", shape);
        }
        match self.dim {
            None => self.dim = Some(dim),
            Some(expected) if expected != dim => {
                anyhow::bail!("embedding dimension changed: {} -> {}", expected, dim)
            }
            Some(_) => {}
        }

        Ok(data[..dim].to_vec())
    }
}

impl EmbeddingExtractor for CampPlusExtractor {
    fn extract(&mut self, samples: &[f32]) -> Result<Vec<f32>, EngineError> {
        self.compute(samples)
            .map_err(|e| EngineError::Embedding(e.to_string()))
    }

    fn dimension(&self) -> Option<usize> {
        self.dim
    }
}
