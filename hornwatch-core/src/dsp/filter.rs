//! Pre-emphasis + Butterworth band-pass + peak normalisation.
//!
//! ## Algorithm
//!
//! 1. Pre-emphasis: `y[0] = x[0]`, `y[i] = x[i] - 0.96 * x[i-1]`.
//! 2. 4th-order Butterworth band-pass (100–2000 Hz), designed through the
//!    bilinear transform as a cascade of second-order sections and applied
//!    forward then backward so no group delay is introduced.
//! 3. Scale so the largest absolute sample is 1.0. Silent input is left as is.
//!
//! Any failure degrades to the unfiltered input.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;
use tracing::warn;

use crate::error::{HornError, Result};

const DEFAULT_PRE_EMPHASIS: f32 = 0.96;
const DEFAULT_LOW_HZ: f64 = 100.0;
const DEFAULT_HIGH_HZ: f64 = 2_000.0;
const DEFAULT_ORDER: usize = 4;

/// One biquad, `a[0]` normalised to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }

    /// Steady-state transposed direct form II state for a unit step input.
    fn step_state(&self) -> [f64; 2] {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let h = self.dc_gain();
        let z1 = b2 - a2 * h;
        let z0 = b1 - a1 * h + z1;
        debug_assert!((b0 + z0 - h).abs() < 1e-9);
        [z0, z1]
    }

    /// Magnitude response at `freq_hz`.
    pub fn magnitude_at(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / sample_rate;
        let z1 = Complex::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = self.b[0] + z1 * self.b[1] + z2 * self.b[2];
        let den = self.a[0] + z1 * self.a[1] + z2 * self.a[2];
        (num / den).norm()
    }
}

/// Design a digital Butterworth band-pass filter as second-order sections.
///
/// `order` is the low-pass prototype order; the band-pass has `order`
/// sections. Cutoffs are normalised against `nyquist_hz`.
///
/// # Errors
/// `HornError::Filter` if the cutoffs do not satisfy `0 < low < high < nyquist`.
pub fn butter_bandpass(
    order: usize,
    low_hz: f64,
    high_hz: f64,
    nyquist_hz: f64,
) -> Result<Vec<Biquad>> {
    if order == 0 {
        return Err(HornError::Filter("filter order must be at least 1".into()));
    }
    let wl = low_hz / nyquist_hz;
    let wh = high_hz / nyquist_hz;
    if !(wl > 0.0 && wl < wh && wh < 1.0) {
        return Err(HornError::Filter(format!(
            "band {low_hz}-{high_hz} Hz is not inside (0, {nyquist_hz}) Hz"
        )));
    }

    // Pre-warp for the bilinear transform at fs = 2.
    let fs = 2.0;
    let warp = |w: f64| 2.0 * fs * (PI * w / fs).tan();
    let (wl, wh) = (warp(wl), warp(wh));
    let bw = wh - wl;
    let wo = (wl * wh).sqrt();

    // Analog low-pass prototype poles, unit gain.
    let n = order as f64;
    let prototype = (0..order).map(|k| {
        let m = -n + 1.0 + 2.0 * k as f64;
        -Complex::from_polar(1.0, PI * m / (2.0 * n))
    });

    // Low-pass → band-pass: each prototype pole splits into two.
    let mut analog_poles = Vec::with_capacity(2 * order);
    for p in prototype {
        let p = p * (bw / 2.0);
        let root = (p * p - wo * wo).sqrt();
        analog_poles.push(p + root);
        analog_poles.push(p - root);
    }
    let analog_gain = bw.powi(order as i32);

    // Bilinear transform. The `order` analog zeros at s = 0 land on z = +1,
    // the remaining `order` zeros at infinity land on z = -1.
    let fs2 = 2.0 * fs;
    let mut gain = Complex::new(analog_gain * fs2.powi(order as i32), 0.0);
    let mut digital_poles = Vec::with_capacity(analog_poles.len());
    for &p in &analog_poles {
        gain /= fs2 - p;
        digital_poles.push((fs2 + p) / (fs2 - p));
    }

    let upper: Vec<Complex<f64>> = digital_poles
        .into_iter()
        .filter(|p| p.im > 1e-12)
        .collect();
    if upper.len() != order {
        return Err(HornError::Filter(format!(
            "unexpected pole layout: {} complex pairs for order {order}",
            upper.len()
        )));
    }

    let mut sections: Vec<Biquad> = upper
        .iter()
        .map(|p| Biquad {
            // (1 - z^-1)(1 + z^-1)
            b: [1.0, 0.0, -1.0],
            a: [1.0, -2.0 * p.re, p.norm_sqr()],
        })
        .collect();
    for coeff in sections[0].b.iter_mut() {
        *coeff *= gain.re;
    }
    Ok(sections)
}

/// Run a section cascade once over `x`, starting from `state`.
fn sos_filter(sections: &[Biquad], x: &[f64], state: &mut [[f64; 2]]) -> Vec<f64> {
    let mut y = x.to_vec();
    for (section, z) in sections.iter().zip(state.iter_mut()) {
        let [b0, b1, b2] = section.b;
        let [_, a1, a2] = section.a;
        for sample in y.iter_mut() {
            let input = *sample;
            let out = b0 * input + z[0];
            z[0] = b1 * input - a1 * out + z[1];
            z[1] = b2 * input - a2 * out;
            *sample = out;
        }
    }
    y
}

/// Number of samples of odd extension added on each side by [`zero_phase`].
pub fn padding_len(sections: &[Biquad]) -> usize {
    3 * (2 * sections.len() + 1)
}

/// Forward-backward filtering with odd-extension padding and steady-state
/// initial conditions, so edges do not ring.
///
/// # Errors
/// `HornError::Filter` if `x` is not longer than [`padding_len`].
pub fn zero_phase(sections: &[Biquad], x: &[f64]) -> Result<Vec<f64>> {
    let edge = padding_len(sections);
    if x.len() <= edge {
        return Err(HornError::Filter(format!(
            "input of {} samples is too short for zero-phase filtering (needs > {edge})",
            x.len()
        )));
    }

    let n = x.len();
    let (first, last) = (x[0], x[n - 1]);
    let mut ext = Vec::with_capacity(n + 2 * edge);
    ext.extend((1..=edge).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(x);
    ext.extend((1..=edge).map(|i| 2.0 * last - x[n - 1 - i]));

    // Per-section steady state, scaled by the DC gain of the sections before it.
    let mut zi = Vec::with_capacity(sections.len());
    let mut scale = 1.0;
    for section in sections {
        let [z0, z1] = section.step_state();
        zi.push([z0 * scale, z1 * scale]);
        scale *= section.dc_gain();
    }
    let scaled = |x0: f64| -> Vec<[f64; 2]> {
        zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect()
    };

    let mut state = scaled(ext[0]);
    let forward = sos_filter(sections, &ext, &mut state);

    let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
    let mut state = scaled(reversed[0]);
    reversed = sos_filter(sections, &reversed, &mut state);
    reversed.reverse();

    Ok(reversed[edge..edge + n].to_vec())
}

/// Noise reduction applied to raw audio before feature extraction.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    pub pre_emphasis: f32,
    pub low_hz: f64,
    pub high_hz: f64,
    pub order: usize,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self {
            pre_emphasis: DEFAULT_PRE_EMPHASIS,
            low_hz: DEFAULT_LOW_HZ,
            high_hz: DEFAULT_HIGH_HZ,
            order: DEFAULT_ORDER,
        }
    }
}

impl NoiseFilter {
    /// Filter `chunk`, falling back to an unmodified copy on any error.
    ///
    /// The output always has the same length as the input.
    pub fn filter(&self, chunk: &[f32], sample_rate: u32) -> Vec<f32> {
        match self.try_filter(chunk, sample_rate) {
            Ok(filtered) => filtered,
            Err(e) => {
                warn!(
                    samples = chunk.len(),
                    sample_rate,
                    error = %e,
                    "noise filtering failed, using raw audio"
                );
                chunk.to_vec()
            }
        }
    }

    /// Fallible form of [`NoiseFilter::filter`].
    pub fn try_filter(&self, chunk: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        if chunk.iter().any(|s| !s.is_finite()) {
            return Err(HornError::Filter("input contains non-finite samples".into()));
        }

        let emphasized = pre_emphasis(chunk, self.pre_emphasis);

        let nyquist = (sample_rate / 2) as f64;
        let sections = butter_bandpass(self.order, self.low_hz, self.high_hz, nyquist)?;
        let input: Vec<f64> = emphasized.iter().map(|&s| s as f64).collect();
        let filtered = zero_phase(&sections, &input)?;

        let mut out: Vec<f32> = filtered.into_iter().map(|s| s as f32).collect();
        normalize_peak(&mut out)?;
        Ok(out)
    }
}

/// First-order pre-emphasis. The first sample passes through unchanged.
pub fn pre_emphasis(x: &[f32], coeff: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(x.len());
    if let Some(&first) = x.first() {
        out.push(first);
        out.extend(x.windows(2).map(|w| w[1] - coeff * w[0]));
    }
    out
}

/// Scale in place so the peak magnitude is 1.0. All-zero input is untouched.
pub fn normalize_peak(x: &mut [f32]) -> Result<()> {
    if x.iter().any(|s| !s.is_finite()) {
        return Err(HornError::Filter("filtered audio is not finite".into()));
    }
    let peak = x.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        for s in x.iter_mut() {
            *s /= peak;
        }
    }
    Ok(())
}
