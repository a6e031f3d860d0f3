//! `FixedClassifier`: placeholder backend that returns a constant answer.
//!
//! Lets the capture → queue → pipeline → report path be exercised end to
//! end without a trained model file.

use tracing::debug;

use crate::error::Result;
use crate::features::FeatureVector;
use crate::inference::HornClassifier;

/// Always predicts `class` with probabilities `proba`.
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier {
    class: usize,
    proba: [f32; 2],
}

impl FixedClassifier {
    pub fn new(class: usize, proba: [f32; 2]) -> Self {
        Self { class, proba }
    }

    /// Class 1 at 90 % confidence.
    pub fn horn() -> Self {
        Self::new(1, [0.1, 0.9])
    }
}

impl HornClassifier for FixedClassifier {
    fn predict_proba(&self, features: &FeatureVector) -> Result<[f32; 2]> {
        debug!(first = features.0[0], "FixedClassifier::predict_proba");
        Ok(self.proba)
    }

    fn predict(&self, _features: &FeatureVector) -> Result<usize> {
        Ok(self.class)
    }

    fn describe(&self) -> String {
        format!("fixed classifier (class {}, proba {:?})", self.class, self.proba)
    }
}
