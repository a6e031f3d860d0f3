//! Horn classifier abstraction.
//!
//! The `HornClassifier` trait decouples the pipeline from the concrete model
//! (the trained `RandomForest`, or a fixed stub in tests). A trained model is
//! immutable, so `predict_proba` takes `&self` and `ModelHandle` shares it
//! read-only without a lock.

pub mod forest;
pub mod stub;

pub use forest::{ForestConfig, RandomForest};

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::features::{FeatureExtractor, FeatureVector};
use crate::ipc::events::HornLabel;

/// Default model location, relative to the working directory.
pub const DEFAULT_MODEL_PATH: &str = "horn_detector_classifier.json";

/// Contract for binary horn / not-horn classifiers.
pub trait HornClassifier: Send + Sync + 'static {
    /// Class probabilities `[p(not horn), p(horn)]`.
    ///
    /// # Errors
    /// Returns an error if the features do not match what the model was
    /// trained on.
    fn predict_proba(&self, features: &FeatureVector) -> Result<[f32; 2]>;

    /// Predicted class id. Ties go to class 0.
    fn predict(&self, features: &FeatureVector) -> Result<usize> {
        let proba = self.predict_proba(features)?;
        Ok(usize::from(proba[1] > proba[0]))
    }

    /// Short description for startup logging.
    fn describe(&self) -> String {
        "horn classifier".into()
    }
}

/// Thread-safe reference-counted handle to any `HornClassifier` implementor.
#[derive(Clone)]
pub struct ModelHandle(pub Arc<dyn HornClassifier>);

impl ModelHandle {
    /// Wrap any `HornClassifier` in a `ModelHandle`.
    pub fn new<M: HornClassifier>(model: M) -> Self {
        Self(Arc::new(model))
    }

    /// Load a trained random forest from `path`.
    ///
    /// # Errors
    /// `HornError::ModelNotFound` if the file is absent,
    /// `HornError::ModelLoad` if it cannot be decoded.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(RandomForest::load(path)?))
    }

    pub fn classifier(&self) -> &dyn HornClassifier {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}

/// One classification result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: HornLabel,
    /// Probability of the horn class.
    pub confidence: f32,
}

/// Classify a feature vector: label from `predict`, confidence from the
/// horn-class probability.
pub fn classify(model: &dyn HornClassifier, features: &FeatureVector) -> Result<Prediction> {
    let class = model.predict(features)?;
    let proba = model.predict_proba(features)?;
    Ok(Prediction {
        label: HornLabel::from_class(class),
        confidence: proba[HornLabel::HORN_CLASS],
    })
}

/// Extract features from a mono buffer and classify it in one call.
///
/// # Errors
/// Propagates feature extraction and inference errors.
pub fn classify_samples(
    model: &dyn HornClassifier,
    extractor: &FeatureExtractor,
    samples: &[f32],
    sample_rate: u32,
) -> Result<Prediction> {
    let features = extractor.try_extract(samples, sample_rate)?;
    classify(model, &features)
}

/// `true` when the buffer is classified as a horn.
pub fn predict_horn(
    model: &dyn HornClassifier,
    extractor: &FeatureExtractor,
    samples: &[f32],
    sample_rate: u32,
) -> Result<bool> {
    Ok(classify_samples(model, extractor, samples, sample_rate)?.label == HornLabel::Horn)
}

#[cfg(test)]
mod tests {
    use super::stub::FixedClassifier;
    use super::*;
    use crate::features::N_MFCC;

    #[test]
    fn confidence_is_horn_probability_even_when_not_horn_wins() {
        let model = FixedClassifier::new(0, [0.7, 0.3]);
        let prediction = classify(&model, &FeatureVector([0.0; N_MFCC])).expect("classify");
        assert_eq!(prediction.label, HornLabel::NotHorn);
        assert!((prediction.confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn default_predict_is_argmax_with_ties_to_zero() {
        struct Proba([f32; 2]);
        impl HornClassifier for Proba {
            fn predict_proba(&self, _features: &FeatureVector) -> Result<[f32; 2]> {
                Ok(self.0)
            }
        }
        let features = FeatureVector([0.0; N_MFCC]);
        assert_eq!(Proba([0.2, 0.8]).predict(&features).expect("predict"), 1);
        assert_eq!(Proba([0.5, 0.5]).predict(&features).expect("predict"), 0);
    }

    #[test]
    fn predict_horn_runs_extraction_first() {
        let model = FixedClassifier::horn();
        let extractor = FeatureExtractor::new(44_100);
        let samples: Vec<f32> = (0..44_100).map(|i| (i as f32 * 0.02).sin()).collect();
        assert!(predict_horn(&model, &extractor, &samples, 44_100).expect("predict"));
        assert!(predict_horn(&model, &extractor, &[], 44_100).is_err());
    }
}
