//! SenseVoice ONNX backend for digit recognition.
//!
//! Front-end: 80-mel log filterbank, LFR stacking (m=7, n=6), per-utterance
//! CMVN. The model is a CTC head over the stacked features; greedy decoding
//! with blank/repeat collapse yields tokens whose output frame index maps
//! directly to time (one frame = 60ms).

use std::fs::File;
use std::io::{BufRead, BufReader};

use ndarray::{Array1, Array3};
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use crate::embedding::fbank::{self, FbankConfig};
use crate::error::EngineError;

use super::digits::normalize_to_digits;
use super::{AsrEngine, AsrResult, AsrToken};

/// LFR window: each output frame stacks this many 10ms fbank frames.
const LFR_M: usize = 7;
/// LFR shift in fbank frames.
const LFR_N: usize = 6;
/// Seconds per CTC output frame: LFR_N * 10ms.
const FRAME_SHIFT_SECS: f32 = 0.06;
/// CTC blank id.
const BLANK_ID: usize = 0;
/// Language id passed to the model: 0 = auto-detect.
const LANG_AUTO: i32 = 0;
/// Inverse text normalization on, so numerals come out as digits.
const TEXTNORM_WITH_ITN: i32 = 14;
/// Duration assumed for the trailing token.
const LAST_TOKEN_SECS: f32 = 0.3;

/// Speech recognizer using SenseVoice.
pub struct SenseVoiceAsr {
    session: Session,
    /// id -> token text.
    tokens: Vec<String>,
    fbank: FbankConfig,
}

impl SenseVoiceAsr {
    pub fn new(model_path: &str, tokens_path: &str, num_threads: usize) -> anyhow::Result<Self> {
        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("Failed to create ORT session builder: {}", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| anyhow::anyhow!("Failed to set intra threads: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| anyhow::anyhow!("Failed to load ASR model '{}': {}", model_path, e))?;

        let tokens = load_tokens(tokens_path)?;

        info!(
            model = model_path,
            vocab = tokens.len(),
            "SenseVoice ASR model loaded"
        );

        Ok(Self {
            session,
            tokens,
            fbank: FbankConfig::default(),
        })
    }

    fn transcribe(&mut self, samples: &[f32]) -> anyhow::Result<AsrResult> {
        let features = fbank::compute_fbank(samples, &self.fbank)
            .ok_or_else(|| anyhow::anyhow!("utterance too short for feature extraction"))?;
        let mut stacked = apply_lfr(&features, LFR_M, LFR_N);
        fbank::cmvn(&mut stacked);

        let num_frames = stacked.len();
        let feat_dim = self.fbank.num_mels * LFR_M;
        let flat: Vec<f32> = stacked.into_iter().flatten().collect();

        let speech = Array3::from_shape_vec((1, num_frames, feat_dim), flat)
            .map_err(|e| anyhow::anyhow!("feature shape error: {}", e))?;
        let speech_val = Tensor::from_array(speech)
            .map_err(|e| anyhow::anyhow!("speech tensor error: {}", e))?;
        let lengths_val = Tensor::from_array(Array1::from_vec(vec![num_frames as i32]))
            .map_err(|e| anyhow::anyhow!("length tensor error: {}", e))?;
        let language_val = Tensor::from_array(Array1::from_vec(vec![LANG_AUTO]))
            .map_err(|e| anyhow::anyhow!("language tensor error: {}", e))?;
        let textnorm_val = Tensor::from_array(Array1::from_vec(vec![TEXTNORM_WITH_ITN]))
            .map_err(|e| anyhow::anyhow!("textnorm tensor error: {}", e))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "x" => speech_val,
                "x_length" => lengths_val,
                "language" => language_val,
                "text_norm" => textnorm_val,
            ])
            .map_err(|e| anyhow::anyhow!("ASR inference error: {}", e))?;

        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow::anyhow!("logits extraction error: {}", e))?;
        if shape.len() != 3 {
            anyhow::bail!("unexpected logits shape {:?}", shape);
        }
        let out_frames = shape[1] as usize;
        let vocab = shape[2] as usize;

        let token_ids = greedy_ctc(logits, out_frames, vocab);
        let result = self.assemble(token_ids);
        debug!(
            text = %result.text,
            digits = %result.digits,
            tokens = result.tokens.len(),
            "utterance recognized"
        );
        Ok(result)
    }

    /// Turns (frame, token id) pairs into text + timestamped tokens.
    ///
    /// SenseVoice prefixes the stream with `<|lang|><|emotion|><|event|>`
    /// markers; anything of the `<|...|>` shape is dropped.
    fn assemble(&self, emitted: Vec<(usize, usize)>) -> AsrResult {
        let mut text = String::new();
        let mut tokens: Vec<AsrToken> = Vec::new();

        for (frame, id) in emitted {
            let piece = match self.tokens.get(id) {
                Some(p) => p.as_str(),
                None => continue,
            };
            if piece.starts_with("<|") {
                continue;
            }

            let piece = piece.replace('▁', " ");
            let start = frame as f32 * FRAME_SHIFT_SECS;
            if let Some(prev) = tokens.last_mut() {
                // End a token where its successor starts.
                prev.end = start.max(prev.start);
            }
            text.push_str(&piece);
            tokens.push(AsrToken {
                token: piece.trim().to_string(),
                start,
                end: start + LAST_TOKEN_SECS,
            });
        }

        let text = text.trim().to_string();
        let digits = normalize_to_digits(&text);
        AsrResult { text, digits, tokens }
    }
}

impl AsrEngine for SenseVoiceAsr {
    fn recognize(&mut self, samples: &[f32]) -> Result<AsrResult, EngineError> {
        self.transcribe(samples)
            .map_err(|e| EngineError::Asr(e.to_string()))
    }
}

/// Low frame rate stacking: concatenate `m` consecutive frames every `n`.
///
/// The front is padded with copies of the first frame ((m-1)/2 of them) and
/// the tail with copies of the last, matching the Kaldi/FunASR convention.
fn apply_lfr(features: &[Vec<f32>], m: usize, n: usize) -> Vec<Vec<f32>> {
    if features.is_empty() {
        return Vec::new();
    }
    let dim = features[0].len();
    let left_pad = (m - 1) / 2;

    let mut padded: Vec<&Vec<f32>> = Vec::with_capacity(features.len() + left_pad + m);
    for _ in 0..left_pad {
        padded.push(&features[0]);
    }
    for f in features {
        padded.push(f);
    }

    let out_frames = features.len().div_ceil(n);
    let last = features.last().expect("non-empty");
    while padded.len() < out_frames * n + m {
        padded.push(last);
    }

    let mut out = Vec::with_capacity(out_frames);
    for t in 0..out_frames {
        let mut row = Vec::with_capacity(m * dim);
        for j in 0..m {
            row.extend_from_slice(padded[t * n + j]);
        }
        out.push(row);
    }
    out
}

/// Greedy CTC decode: per-frame argmax, collapse repeats, drop blanks.
/// Returns (output frame index, token id) for each emission.
fn greedy_ctc(logits: &[f32], frames: usize, vocab: usize) -> Vec<(usize, usize)> {
    let mut emitted = Vec::new();
    let mut prev = BLANK_ID;

    for t in 0..frames {
        let row = &logits[t * vocab..(t + 1) * vocab];
        let mut best = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (i, &score) in row.iter().enumerate() {
            if score > best_score {
                best_score = score;
                best = i;
            }
        }
        if best != BLANK_ID && best != prev {
            emitted.push((t, best));
        }
        prev = best;
    }

    emitted
}

/// Loads a sherpa-style token table: one `<token> <id>` pair per line.
fn load_tokens(path: &str) -> anyhow::Result<Vec<String>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open tokens file '{}': {}", path, e))?;
    let reader = BufReader::new(file);

    let mut entries: Vec<(usize, String)> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        // The token itself may be whitespace-ish; the id is the last field.
        let (token, id_str) = match trimmed.rsplit_once(' ') {
            Some(parts) => parts,
            None => continue,
        };
        let id: usize = id_str
            .parse()
            .map_err(|e| anyhow::anyhow!("bad token id '{}': {}", id_str, e))?;
        entries.push((id, token.to_string()));
    }

    let max_id = entries.iter().map(|(id, _)| *id).max().unwrap_or(0);
    let mut table = vec![String::new(); max_id + 1];
    for (id, token) in entries {
        table[id] = token;
    }
    Ok(table)
}
