use ndarray::{Array0, Array1, Array2, Array3};
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineError;

use super::{SpeechSpan, VadGate};

/// VAD chunk size: 512 samples at 16kHz = 32ms per frame.
const CHUNK_SIZE: usize = 512;
const SAMPLE_RATE: i64 = 16000;

/// Silero VAD v4: separate h/c states, hidden size 64
const V4_HIDDEN_SIZE: usize = 64;
/// Silero VAD v5: combined state, hidden size 128
const V5_HIDDEN_SIZE: usize = 128;

/// Which Silero VAD model version we detected.
#[derive(Debug, Clone, Copy)]
enum ModelVersion {
    /// v4: inputs (input, sr, h, c), outputs (output, hn, cn)
    V4,
    /// v5: inputs (input, state, sr), outputs (output, stateN)
    V5,
}

/// Silero VAD wrapper using ONNX Runtime, run as a one-shot gate over a
/// complete utterance.
///
/// Operates on 512-sample chunks (32ms) at 16kHz mono. Auto-detects v4 vs
/// v5 model format.
pub struct SileroVad {
    session: Session,
    version: ModelVersion,
    /// v4: LSTM hidden state [2, 1, 64]
    h: Array3<f32>,
    /// v4: LSTM cell state [2, 1, 64]
    c: Array3<f32>,
    /// v5: combined state [2, 1, 128]
    combined_state: Array3<f32>,
    start_threshold: f32,
    end_threshold: f32,
    min_speech_frames: usize,
    min_silence_frames: usize,
}

impl SileroVad {
    /// Creates a new Silero VAD from an ONNX model file.
    pub fn new(model_path: &str, config: &EngineConfig) -> anyhow::Result<Self> {
        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("Failed to create ORT session builder: {}", e))?
            .with_intra_threads(1)
            .map_err(|e| anyhow::anyhow!("Failed to set intra threads: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| anyhow::anyhow!("Failed to load VAD model '{}': {}", model_path, e))?;

        // Detect model version by inspecting input names
        let input_names: Vec<String> =
            session.inputs().iter().map(|i| i.name().to_string()).collect();
        let version = if input_names.iter().any(|n| n == "state") {
            ModelVersion::V5
        } else {
            ModelVersion::V4
        };

        info!(?version, ?input_names, "Silero VAD model loaded");

        Ok(Self {
            session,
            version,
            h: Array3::zeros((2, 1, V4_HIDDEN_SIZE)),
            c: Array3::zeros((2, 1, V4_HIDDEN_SIZE)),
            combined_state: Array3::zeros((2, 1, V5_HIDDEN_SIZE)),
            start_threshold: config.vad_start_threshold,
            end_threshold: config.vad_end_threshold,
            min_speech_frames: config.vad_min_speech_frames,
            min_silence_frames: config.vad_min_silence_frames,
        })
    }

    /// Scans the whole buffer and returns the bounding span of speech.
    ///
    /// Hysteresis: `min_speech_frames` consecutive frames above the start
    /// threshold open a speech region; `min_silence_frames` below the end
    /// threshold close it. The returned span covers the first opening to
    /// the last close.
    fn analyze(&mut self, samples: &[f32]) -> anyhow::Result<Option<SpeechSpan>> {
        self.reset_states();

        let mut first_start: Option<usize> = None;
        let mut last_end: usize = 0;
        let mut in_speech = false;
        let mut speech_frames = 0usize;
        let mut silence_frames = 0usize;

        let total_chunks = samples.len().div_ceil(CHUNK_SIZE);
        let mut chunk_buf = [0.0f32; CHUNK_SIZE];

        for chunk_idx in 0..total_chunks {
            let offset = chunk_idx * CHUNK_SIZE;
            let remain = samples.len() - offset;
            let take = remain.min(CHUNK_SIZE);
            chunk_buf[..take].copy_from_slice(&samples[offset..offset + take]);
            // Zero-pad the tail chunk
            chunk_buf[take..].fill(0.0);

            let speech_prob = self.run_inference(&chunk_buf)?;

            if in_speech {
                if speech_prob < self.end_threshold {
                    silence_frames += 1;
                    if silence_frames >= self.min_silence_frames {
                        in_speech = false;
                        speech_frames = 0;
                    }
                } else {
                    silence_frames = 0;
                    last_end = (offset + take).min(samples.len());
                }
            } else if speech_prob >= self.start_threshold {
                speech_frames += 1;
                if speech_frames >= self.min_speech_frames {
                    in_speech = true;
                    silence_frames = 0;
                    let span_start =
                        (chunk_idx + 1 - self.min_speech_frames.max(1)) * CHUNK_SIZE;
                    if first_start.is_none() {
                        first_start = Some(span_start);
                    }
                    last_end = (offset + take).min(samples.len());
                }
            } else {
                speech_frames = 0;
            }
        }

        let span = first_start.map(|start| SpeechSpan {
            start,
            end: last_end.max(start),
        });
        debug!(?span, total_chunks, "VAD scan complete");
        Ok(span)
    }

    /// Runs the Silero VAD ONNX model on a 512-sample chunk.
    fn run_inference(&mut self, chunk: &[f32]) -> anyhow::Result<f32> {
        let input = Array2::from_shape_vec((1, CHUNK_SIZE), chunk.to_vec())
            .map_err(|e| anyhow::anyhow!("Input array shape error: {}", e))?;
        let input_val = Tensor::from_array(input)
            .map_err(|e| anyhow::anyhow!("Input tensor error: {}", e))?;

        match self.version {
            ModelVersion::V5 => self.run_inference_v5(input_val),
            ModelVersion::V4 => self.run_inference_v4(input_val),
        }
    }

    /// Silero VAD v5: inputs (input, state, sr), outputs (output, stateN)
    fn run_inference_v5(&mut self, input_val: Tensor<f32>) -> anyhow::Result<f32> {
        let state_val = Tensor::from_array(self.combined_state.clone())
            .map_err(|e| anyhow::anyhow!("State tensor error: {}", e))?;
        // sr must be a 0-d int64 scalar
        let sr = Array0::from_elem((), SAMPLE_RATE);
        let sr_val =
            Tensor::from_array(sr).map_err(|e| anyhow::anyhow!("SR tensor error: {}", e))?;

        let outputs = self
            .session
            .run(ort::inputs!("input" => input_val, "state" => state_val, "sr" => sr_val))
            .map_err(|e| anyhow::anyhow!("VAD v5 inference error: {}", e))?;

        // Output 0: speech probability
        let (_shape, output_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow::anyhow!("Output extraction error: {}", e))?;
        let speech_prob = output_data.first().copied().unwrap_or(0.0);

        // Output 1: updated state [2, 1, 128]
        let expected = 2 * V5_HIDDEN_SIZE;
        if let Ok((_shape, state_data)) = outputs[1].try_extract_tensor::<f32>() {
            if state_data.len() == expected {
                self.combined_state =
                    Array3::from_shape_vec((2, 1, V5_HIDDEN_SIZE), state_data.to_vec())
                        .unwrap_or_else(|_| Array3::zeros((2, 1, V5_HIDDEN_SIZE)));
            }
        }

        Ok(speech_prob)
    }

    /// Silero VAD v4: inputs (input, sr, h, c), outputs (output, hn, cn)
    fn run_inference_v4(&mut self, input_val: Tensor<f32>) -> anyhow::Result<f32> {
        let sr = Array1::from_vec(vec![SAMPLE_RATE]);
        let sr_val =
            Tensor::from_array(sr).map_err(|e| anyhow::anyhow!("SR tensor error: {}", e))?;
        let h_val = Tensor::from_array(self.h.clone())
            .map_err(|e| anyhow::anyhow!("H tensor error: {}", e))?;
        let c_val = Tensor::from_array(self.c.clone())
            .map_err(|e| anyhow::anyhow!("C tensor error: {}", e))?;

        let outputs = self
            .session
            .run(ort::inputs![input_val, sr_val, h_val, c_val])
            .map_err(|e| anyhow::anyhow!("VAD v4 inference error: {}", e))?;

        let (_shape, output_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow::anyhow!("Output extraction error: {}", e))?;
        let speech_prob = output_data.first().copied().unwrap_or(0.0);

        let expected = 2 * V4_HIDDEN_SIZE;
        if let Ok((_shape, hn_data)) = outputs[1].try_extract_tensor::<f32>() {
            if hn_data.len() == expected {
                self.h = Array3::from_shape_vec((2, 1, V4_HIDDEN_SIZE), hn_data.to_vec())
                    .unwrap_or_else(|_| Array3::zeros((2, 1, V4_HIDDEN_SIZE)));
            }
        }
        if let Ok((_shape, cn_data)) = outputs[2].try_extract_tensor::<f32>() {
            if cn_data.len() == expected {
                self.c = Array3::from_shape_vec((2, 1, V4_HIDDEN_SIZE), cn_data.to_vec())
                    .unwrap_or_else(|_| Array3::zeros((2, 1, V4_HIDDEN_SIZE)));
            }
        }

        Ok(speech_prob)
    }

    /// Clears the recurrent state between utterances.
    fn reset_states(&mut self) {
        self.h = Array3::zeros((2, 1, V4_HIDDEN_SIZE));
        self.c = Array3::zeros((2, 1, V4_HIDDEN_SIZE));
        self.combined_state = Array3::zeros((2, 1, V5_HIDDEN_SIZE));
    }
}

impl VadGate for SileroVad {
    fn detect(&mut self, samples: &[f32]) -> Result<Option<SpeechSpan>, EngineError> {
        self.analyze(samples)
            .map_err(|e| EngineError::Vad(e.to_string()))
    }
}
