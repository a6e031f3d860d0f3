//! Chunk → fixed-length feature vector.
//!
//! `NoiseFilter` → 13 MFCCs → mean over time frames. Used identically by
//! the live pipeline and the training binary so both see the same features.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dsp::{Mfcc, NoiseFilter};
use crate::error::{HornError, Result};

/// Number of MFCC coefficients per feature vector.
pub const N_MFCC: usize = 13;

/// Mean MFCCs of one audio chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f32; N_MFCC]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        N_MFCC
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = HornError;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        let len = values.len();
        let array: [f32; N_MFCC] = values.try_into().map_err(|_| {
            HornError::FeatureExtraction(format!("expected {N_MFCC} coefficients, got {len}"))
        })?;
        Ok(Self(array))
    }
}

/// Filter + MFCC pipeline for one configured sample rate.
#[derive(Debug)]
pub struct FeatureExtractor {
    filter: NoiseFilter,
    mfcc: Mfcc,
}

impl FeatureExtractor {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_filter(sample_rate, NoiseFilter::default())
    }

    pub fn with_filter(sample_rate: u32, filter: NoiseFilter) -> Self {
        Self {
            filter,
            mfcc: Mfcc::new(sample_rate, N_MFCC),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.mfcc.sample_rate()
    }

    /// Extract features, logging and swallowing any error.
    ///
    /// Returns `None` when the chunk cannot be analysed; the caller should
    /// skip classification for it.
    pub fn extract(&self, chunk: &[f32], sample_rate: u32) -> Option<FeatureVector> {
        match self.try_extract(chunk, sample_rate) {
            Ok(features) => Some(features),
            Err(e) => {
                warn!(samples = chunk.len(), sample_rate, error = %e, "feature extraction failed");
                None
            }
        }
    }

    /// Fallible form of [`FeatureExtractor::extract`].
    ///
    /// A `sample_rate` other than the one this extractor was built for gets a
    /// one-off MFCC frontend.
    pub fn try_extract(&self, chunk: &[f32], sample_rate: u32) -> Result<FeatureVector> {
        if sample_rate == 0 {
            return Err(HornError::FeatureExtraction("sample rate is zero".into()));
        }
        let filtered = self.filter.filter(chunk, sample_rate);

        let mean = if sample_rate == self.mfcc.sample_rate() {
            self.mfcc.mean_coefficients(&filtered)?
        } else {
            debug!(
                sample_rate,
                configured = self.mfcc.sample_rate(),
                "building MFCC frontend for non-default rate"
            );
            Mfcc::new(sample_rate, N_MFCC).mean_coefficients(&filtered)?
        };
        FeatureVector::try_from(mean)
    }
}
