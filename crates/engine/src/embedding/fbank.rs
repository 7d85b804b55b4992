use std::f64::consts::PI;

/// Configures mel filterbank feature extraction.
///
/// Defaults match Kaldi/sherpa-onnx front-ends: Povey window, 25ms frames,
/// 10ms shift, 80 mel bins, 20-7600 Hz range at 16kHz.
#[derive(Debug, Clone)]
pub struct FbankConfig {
    /// Input sample rate in Hz.
    pub sample_rate: usize,
    /// Number of mel filterbank channels.
    pub num_mels: usize,
    /// Frame length in samples (400 = 25ms @ 16kHz).
    pub frame_length: usize,
    /// Frame shift in samples (160 = 10ms @ 16kHz).
    pub frame_shift: usize,
    /// Pre-emphasis coefficient.
    pub pre_emphasis: f64,
    /// Floor for log energy.
    pub energy_floor: f64,
    /// Low cutoff frequency for mel bins.
    pub low_freq: f64,
    /// High cutoff frequency, negative = offset from Nyquist.
    pub high_freq: f64,
    /// Remove DC offset per frame.
    pub remove_dc: bool,
    /// Use Povey window (hamming^0.85) instead of Hamming.
    pub povey_window: bool,
}

impl Default for FbankConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            num_mels: 80,
            frame_length: 400,
            frame_shift: 160,
            pre_emphasis: 0.97,
            energy_floor: 1e-10,
            low_freq: 20.0,
            high_freq: -400.0, // Nyquist - 400 = 7600 Hz for 16kHz
            remove_dc: true,
            povey_window: true,
        }
    }
}

/// Extracts log mel filterbank features from mono f32 audio in [-1, 1].
///
/// Output: 2D vec `[num_frames][num_mels]` of log mel energies.
/// Returns `None` if the audio is too short for a single frame.
pub fn compute_fbank(samples: &[f32], cfg: &FbankConfig) -> Option<Vec<Vec<f32>>> {
    if cfg.frame_shift == 0 || cfg.frame_length == 0 || cfg.num_mels == 0 {
        return None;
    }
    if samples.len() < cfg.frame_length {
        return None;
    }

    let num_frames = (samples.len() - cfg.frame_length) / cfg.frame_shift + 1;

    // FFT size: next power of 2 >= frame_length.
    let fft_size = next_pow2(cfg.frame_length);
    let half_fft = fft_size / 2 + 1;

    let window = if cfg.povey_window {
        povey_window(cfg.frame_length)
    } else {
        hamming_window(cfg.frame_length)
    };

    let high_freq = if cfg.high_freq <= 0.0 {
        cfg.sample_rate as f64 / 2.0 + cfg.high_freq
    } else {
        cfg.high_freq
    };

    let filterbank = mel_filterbank(
        cfg.num_mels,
        fft_size,
        cfg.sample_rate,
        cfg.low_freq,
        high_freq,
    );

    let mut planner = rustfft::FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_size);

    let mut result = Vec::with_capacity(num_frames);
    let mut fft_buf = vec![rustfft::num_complex::Complex::new(0.0f64, 0.0); fft_size];

    for f in 0..num_frames {
        let offset = f * cfg.frame_shift;

        let mut frame_buf: Vec<f64> = samples[offset..offset + cfg.frame_length]
            .iter()
            .map(|&s| s as f64)
            .collect();

        if cfg.remove_dc {
            let mean: f64 = frame_buf.iter().sum::<f64>() / cfg.frame_length as f64;
            for v in &mut frame_buf {
                *v -= mean;
            }
        }

        // Pre-emphasis, applied per frame after DC removal.
        if cfg.pre_emphasis > 0.0 {
            for i in (1..cfg.frame_length).rev() {
                frame_buf[i] -= cfg.pre_emphasis * frame_buf[i - 1];
            }
            frame_buf[0] *= 1.0 - cfg.pre_emphasis;
        }

        // Apply window and zero-pad to FFT size.
        for v in fft_buf.iter_mut() {
            *v = rustfft::num_complex::Complex::new(0.0, 0.0);
        }
        for i in 0..cfg.frame_length {
            fft_buf[i] = rustfft::num_complex::Complex::new(frame_buf[i] * window[i], 0.0);
        }

        fft.process(&mut fft_buf);

        let mut power_spec = vec![0.0f64; half_fft];
        for (k, slot) in power_spec.iter_mut().enumerate() {
            *slot = fft_buf[k].norm_sqr();
        }

        let mut frame = vec![0.0f32; cfg.num_mels];
        for m in 0..cfg.num_mels {
            let mut energy: f64 = 0.0;
            for (k, &w) in filterbank[m].iter().enumerate() {
                energy += w * power_spec[k];
            }
            if energy < cfg.energy_floor {
                energy = cfg.energy_floor;
            }
            frame[m] = energy.ln() as f32;
        }
        result.push(frame);
    }

    Some(result)
}

/// CMVN: subtract mean and divide by std per mel bin.
pub fn cmvn(features: &mut [Vec<f32>]) {
    if features.is_empty() {
        return;
    }
    let num_mels = features[0].len();
    let t = features.len() as f64;

    for m in 0..num_mels {
        let mut sum: f64 = 0.0;
        for f in features.iter() {
            sum += f[m] as f64;
        }
        let mean = sum / t;

        let mut var_sum: f64 = 0.0;
        for f in features.iter() {
            let d = f[m] as f64 - mean;
            var_sum += d * d;
        }
        let mut std = (var_sum / t).sqrt();
        if std < 1e-10 {
            std = 1e-10;
        }

        for f in features.iter_mut() {
            f[m] = ((f[m] as f64 - mean) / std) as f32;
        }
    }
}

/// Mean-only normalization per mel bin, as used by speaker embedding
/// front-ends.
pub fn mean_norm(features: &mut [Vec<f32>]) {
    if features.is_empty() {
        return;
    }
    let num_mels = features[0].len();
    let t = features.len() as f64;

    for m in 0..num_mels {
        let mut sum: f64 = 0.0;
        for f in features.iter() {
            sum += f[m] as f64;
        }
        let mean = sum / t;
        for f in features.iter_mut() {
            f[m] = (f[m] as f64 - mean) as f32;
        }
    }
}

fn next_pow2(n: usize) -> usize {
    let mut p = 1;
    while p < n {
        p <<= 1;
    }
    p
}

fn hamming_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Povey window (hamming^0.85) used by Kaldi.
fn povey_window(n: usize) -> Vec<f64> {
    hamming_window(n).into_iter().map(|w| w.powf(0.85)).collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Computes triangular mel filterbank weights: `[num_mels][half_fft]`.
fn mel_filterbank(
    num_mels: usize,
    fft_size: usize,
    sample_rate: usize,
    low_freq: f64,
    high_freq: f64,
) -> Vec<Vec<f64>> {
    let half_fft = fft_size / 2 + 1;
    let mel_low = hz_to_mel(low_freq);
    let mel_high = hz_to_mel(high_freq);

    let mel_points: Vec<f64> = (0..num_mels + 2)
        .map(|i| mel_low + i as f64 * (mel_high - mel_low) / (num_mels + 1) as f64)
        .collect();

    let bin_indices: Vec<usize> = mel_points
        .iter()
        .map(|&m| {
            let hz = mel_to_hz(m);
            let bin = (hz * fft_size as f64 / sample_rate as f64).floor() as isize;
            bin.max(0).min(half_fft as isize - 1) as usize
        })
        .collect();

    let mut fb = Vec::with_capacity(num_mels);
    for m in 0..num_mels {
        let mut filter = vec![0.0f64; half_fft];
        let left = bin_indices[m];
        let center = bin_indices[m + 1];
        let right = bin_indices[m + 2];

        if center > left {
            for k in left..=center {
                filter[k] = (k - left) as f64 / (center - left) as f64;
            }
        }
        if right > center {
            for k in center..=right {
                filter[k] = (right - k) as f64 / (right - center) as f64;
            }
        }
        fb.push(filter);
    }
    fb
}
