//! Mel-frequency cepstral coefficients.
//!
//! Frontend parameters follow the common audio-analysis defaults:
//! `n_fft = 2048`, hop 512, periodic Hann window, frames centred by padding
//! `n_fft / 2` zeros on each side, 128 Slaney mel bands spanning 0..sr/2 with
//! area normalisation, power spectrum converted to dB with an 80 dB dynamic
//! range, then an orthonormal DCT-II.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{HornError, Result};

pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;
pub const N_MELS: usize = 128;
const AMIN: f64 = 1e-10;
const TOP_DB: f64 = 80.0;

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1_000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        mel * F_SP
    }
}

/// Periodic Hann window (the DFT-even variant used for spectral analysis).
pub fn build_hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos()) as f32)
        .collect()
}

/// One triangular mel filter stored sparsely: weights start at bin `start`.
#[derive(Debug, Clone)]
struct MelBand {
    start: usize,
    weights: Vec<f64>,
}

/// Slaney-normalised triangular filterbank over `0..=n_fft/2` bins.
fn build_mel_filters(n_fft: usize, sample_rate: u32, n_mels: usize) -> Vec<MelBand> {
    let n_bins = n_fft / 2 + 1;
    let fmax = sample_rate as f64 / 2.0;
    let bin_hz: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_max = hz_to_mel(fmax);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            let enorm = 2.0 / (hi - lo);
            let dense: Vec<f64> = bin_hz
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect();
            let start = dense.iter().position(|&w| w > 0.0).unwrap_or(0);
            let end = dense
                .iter()
                .rposition(|&w| w > 0.0)
                .map_or(start, |i| i + 1);
            MelBand {
                start,
                weights: dense[start..end].to_vec(),
            }
        })
        .collect()
}

/// Orthonormal DCT-II basis, `n_out` rows of length `n_in`.
fn build_dct(n_out: usize, n_in: usize) -> Vec<Vec<f64>> {
    let n = n_in as f64;
    (0..n_out)
        .map(|k| {
            let norm = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| norm * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                .collect()
        })
        .collect()
}

/// MFCC transform for one sample rate. Build once, reuse per chunk.
pub struct Mfcc {
    sample_rate: u32,
    n_mfcc: usize,
    hann_window: Vec<f32>,
    mel_filters: Vec<MelBand>,
    dct: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f32>>,
}

impl Mfcc {
    pub fn new(sample_rate: u32, n_mfcc: usize) -> Self {
        Self {
            sample_rate,
            n_mfcc,
            hann_window: build_hann_window(N_FFT),
            mel_filters: build_mel_filters(N_FFT, sample_rate, N_MELS),
            dct: build_dct(n_mfcc, N_MELS),
            fft: FftPlanner::<f32>::new().plan_fft_forward(N_FFT),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of STFT frames produced for `n_samples` input samples.
    pub fn frame_count(n_samples: usize) -> usize {
        1 + n_samples / HOP_LENGTH
    }

    /// Log-mel power spectrogram in dB, `[frame][mel]`.
    fn log_mel_spectrogram(&self, samples: &[f32]) -> Vec<Vec<f64>> {
        let pad = N_FFT / 2;
        let mut padded = vec![0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let n_frames = Self::frame_count(samples.len());
        let mut fft_buf = vec![Complex::new(0.0f32, 0.0); N_FFT];
        let mut power = vec![0f64; N_FFT / 2 + 1];
        let mut spec = Vec::with_capacity(n_frames);

        for frame in 0..n_frames {
            let offset = frame * HOP_LENGTH;
            for (i, v) in fft_buf.iter_mut().enumerate() {
                *v = Complex::new(padded[offset + i] * self.hann_window[i], 0.0);
            }
            self.fft.process(&mut fft_buf);
            for (p, c) in power.iter_mut().zip(fft_buf.iter()) {
                *p = c.norm_sqr() as f64;
            }

            let mel: Vec<f64> = self
                .mel_filters
                .iter()
                .map(|band| {
                    band.weights
                        .iter()
                        .zip(&power[band.start..])
                        .map(|(w, p)| w * p)
                        .sum::<f64>()
                })
                .map(|energy| 10.0 * energy.max(AMIN).log10())
                .collect();
            spec.push(mel);
        }

        let max_db = spec
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = max_db - TOP_DB;
        for v in spec.iter_mut().flatten() {
            *v = v.max(floor);
        }
        spec
    }

    /// Per-frame coefficients, `[frame][n_mfcc]`.
    ///
    /// # Errors
    /// `HornError::FeatureExtraction` for empty input or non-finite output.
    pub fn coefficients(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>> {
        if samples.is_empty() {
            return Err(HornError::FeatureExtraction("empty audio buffer".into()));
        }
        let spec = self.log_mel_spectrogram(samples);
        let frames: Vec<Vec<f32>> = spec
            .iter()
            .map(|mel| {
                self.dct
                    .iter()
                    .map(|basis| basis.iter().zip(mel).map(|(b, m)| b * m).sum::<f64>() as f32)
                    .collect()
            })
            .collect();
        if frames.iter().flatten().any(|c| !c.is_finite()) {
            return Err(HornError::FeatureExtraction(
                "MFCC produced non-finite values".into(),
            ));
        }
        Ok(frames)
    }

    /// Mean of each coefficient across all frames.
    pub fn mean_coefficients(&self, samples: &[f32]) -> Result<Vec<f32>> {
        let frames = self.coefficients(samples)?;
        let mut mean = vec![0f64; self.n_mfcc];
        for frame in &frames {
            for (acc, c) in mean.iter_mut().zip(frame) {
                *acc += *c as f64;
            }
        }
        let n = frames.len() as f64;
        Ok(mean.into_iter().map(|v| (v / n) as f32).collect())
    }
}

impl std::fmt::Debug for Mfcc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mfcc")
            .field("sample_rate", &self.sample_rate)
            .field("n_mfcc", &self.n_mfcc)
            .finish_non_exhaustive()
    }
}
