//! Per-digit slicing of an utterance using ASR timestamps.

use crate::error::EngineError;

/// A slice of PCM corresponding to one prompted digit.
#[derive(Debug, Clone)]
pub struct DigitSlice {
    pub digit: String,
    pub samples: Vec<f32>,
    /// Unpadded span, seconds.
    pub start: f32,
    pub end: f32,
}

/// Cuts one padded slice out of `audio`.
///
/// The slice runs from `start - padding` to `end + padding`, clamped to the
/// buffer. In no-overlap mode the end is additionally clamped at the next
/// digit's start.
fn cut_with_padding(
    audio: &[f32],
    sample_rate: u32,
    start_sec: f32,
    end_sec: f32,
    padding_secs: f64,
    next_start_sec: Option<f32>,
) -> Vec<f32> {
    let rate = sample_rate as f64;
    let start_idx = (start_sec as f64 * rate) as usize;
    let end_idx = (end_sec as f64 * rate) as usize;
    let pad = (padding_secs * rate) as usize;

    let lo = start_idx.saturating_sub(pad);
    let mut hi = (end_idx + pad).min(audio.len());
    if let Some(next_start) = next_start_sec {
        let next_idx = (next_start as f64 * rate) as usize;
        hi = hi.min(next_idx.max(lo));
    }

    audio[lo..hi.max(lo)].to_vec()
}

/// Produces one padded PCM slice per digit timestamp.
///
/// `expected` is the prompted digit string: the timestamps must spell it
/// exactly, one slice per position, or the cut fails.
pub fn segment_by_timestamps(
    audio: &[f32],
    timestamps: &[(String, f32, f32)],
    expected: &str,
    sample_rate: u32,
    padding_secs: f64,
    no_overlap: bool,
) -> Result<Vec<DigitSlice>, EngineError> {
    if timestamps.is_empty() {
        return Err(EngineError::Segmentation(
            "no digit timestamps to segment".to_string(),
        ));
    }

    let expected_count = expected.chars().count();
    if timestamps.len() != expected_count {
        return Err(EngineError::Segmentation(format!(
            "{} digit tokens for a {}-digit prompt",
            timestamps.len(),
            expected_count
        )));
    }
    let spelled: String = timestamps.iter().map(|(d, _, _)| d.as_str()).collect();
    if spelled != expected {
        return Err(EngineError::Segmentation(format!(
            "digit tokens spell {:?}, prompt is {:?}",
            spelled, expected
        )));
    }

    let mut slices = Vec::with_capacity(timestamps.len());
    for (i, (digit, start_sec, end_sec)) in timestamps.iter().enumerate() {
        let next_start = if no_overlap {
            timestamps.get(i + 1).map(|(_, s, _)| *s)
        } else {
            None
        };

        let samples = cut_with_padding(
            audio,
            sample_rate,
            *start_sec,
            *end_sec,
            padding_secs,
            next_start,
        );

        if samples.is_empty() {
            return Err(EngineError::Segmentation(format!(
                "empty slice for digit '{}' at {:.3}-{:.3}s",
                digit, start_sec, end_sec
            )));
        }

        slices.push(DigitSlice {
            digit: digit.clone(),
            samples,
            start: *start_sec,
            end: *end_sec,
        });
    }

    Ok(slices)
}
