//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Some input devices cannot capture at 44.1 kHz and fall back to their
//! native rate (commonly 48 kHz). The classifier was trained on 44.1 kHz
//! features, so `RateConverter` brings each chunk back to the target rate
//! on the pipeline thread, where allocation is allowed.
//!
//! When capture rate == target rate, `RateConverter` is a passthrough and
//! no rubato session is created at all.
//!
//! ## Usage
//!
//! ```ignore
//! let mut rc = RateConverter::new(48_000, 44_100, 1024)?;
//! let out = rc.process_block(&chunk_samples)?; // whole chunk at 44.1 kHz
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{HornError, Result};

/// Upper bound on flush calls when draining the resampler delay line.
const MAX_FLUSH_CALLS: usize = 64;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `capture_rate`: Sample rate of the incoming audio (Hz).
    /// - `target_rate`: Sample rate the features are computed at (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `1024`).
    ///
    /// # Errors
    /// Returns `HornError::AudioStream` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        let chunk_size = chunk_size.max(1);
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                chunk_size,
                output_buf: Vec::new(),
                ratio: 1.0,
            });
        }
        if capture_rate == 0 || target_rate == 0 {
            return Err(HornError::AudioStream(format!(
                "invalid resampling rates {capture_rate} -> {target_rate}"
            )));
        }

        let ratio = target_rate as f64 / capture_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| HornError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(
            capture_rate,
            target_rate,
            chunk_size,
            max_out,
            "resampling enabled from={} to={}",
            capture_rate,
            target_rate
        );

        Ok(Self {
            resampler: Some(resampler),
            chunk_size,
            output_buf,
            ratio,
        })
    }

    /// Convert one self-contained block.
    ///
    /// The resampler is reset first, the tail is flushed, and the filter
    /// delay is trimmed, so the output holds exactly
    /// `round(samples.len() * ratio)` samples aligned with the input.
    ///
    /// # Errors
    /// `HornError::AudioStream` if rubato rejects a buffer.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let ratio = self.ratio;
        let chunk_size = self.chunk_size;
        let Some(ref mut resampler) = self.resampler else {
            return Ok(samples.to_vec());
        };
        resampler.reset();

        let expected = (samples.len() as f64 * ratio).round() as usize;
        let delay = resampler.output_delay();
        let mut out = Vec::with_capacity(expected + delay);
        let map_err = |e: rubato::ResampleError| HornError::AudioStream(format!("resample: {e}"));

        let mut blocks = samples.chunks_exact(chunk_size);
        for block in blocks.by_ref() {
            let (_, produced) = resampler
                .process_into_buffer(&[block], &mut self.output_buf, None)
                .map_err(map_err)?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
        }
        let remainder = blocks.remainder();
        if !remainder.is_empty() {
            let (_, produced) = resampler
                .process_partial_into_buffer(Some(&[remainder]), &mut self.output_buf, None)
                .map_err(map_err)?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
        }

        let mut flushes = 0;
        while out.len() < expected + delay && flushes < MAX_FLUSH_CALLS {
            let (_, produced) = resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buf, None)
                .map_err(map_err)?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
            flushes += 1;
        }

        out.drain(..delay.min(out.len()));
        out.resize(expected, 0.0);
        Ok(out)
    }

    /// Returns `true` when capture rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
