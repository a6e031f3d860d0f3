//! Offline training: dataset scan, train/test split, forest fit and evaluation.
//!
//! The dataset directory holds one subfolder per class:
//!
//! ```text
//! dataset/
//!   horn/      *.wav   → class 1
//!   nothorn/   *.wav   → class 0
//! ```
//!
//! Files are read at their native sample rate and go through the same
//! `FeatureExtractor` the live pipeline uses, noise filter included.
//! Models fitted on unfiltered MFCCs are not feature-compatible and must be
//! retrained with `hornwatch-train`.

use std::fmt;
use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    audio::wav::read_wav,
    error::{HornError, Result},
    features::{FeatureExtractor, FeatureVector},
    inference::{ForestConfig, HornClassifier, RandomForest},
};

/// Subfolder name → class id.
pub const LABELS: [(&str, usize); 2] = [("horn", 1), ("nothorn", 0)];

/// Class names indexed by class id, as printed in the report.
pub const CLASS_NAMES: [&str; 2] = ["nothorn", "horn"];

/// Feature matrix plus labels, one row per readable file.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<usize>,
    pub files: Vec<PathBuf>,
    /// Files that could not be decoded or analysed.
    pub skipped: usize,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Samples per class, indexed by class id.
    pub fn class_counts(&self) -> [usize; 2] {
        let mut counts = [0; 2];
        for &label in &self.labels {
            counts[label.min(1)] += 1;
        }
        counts
    }

    fn subset(&self, indices: &[usize]) -> (Vec<FeatureVector>, Vec<usize>) {
        indices
            .iter()
            .map(|&i| (self.features[i], self.labels[i]))
            .unzip()
    }
}

/// Scan `dir` for labelled `.wav` files and extract one feature vector each.
///
/// Files are visited in sorted order so the result does not depend on
/// directory iteration order. Unreadable files are logged and skipped.
///
/// # Errors
/// `HornError::Dataset` if a class folder is missing or no file could be used.
pub fn load_dataset(dir: &Path, extractor: &FeatureExtractor) -> Result<Dataset> {
    let mut dataset = Dataset::default();

    for (folder, label) in LABELS {
        let folder_path = dir.join(folder);
        let entries = std::fs::read_dir(&folder_path).map_err(|e| {
            HornError::Dataset(format!("cannot read {}: {e}", folder_path.display()))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "wav"))
            .collect();
        files.sort();
        info!(folder, label, files = files.len(), "scanning class folder");

        for path in files {
            match file_features(&path, extractor) {
                Ok(features) => {
                    debug!(file = %path.display(), label, "features extracted");
                    dataset.features.push(features);
                    dataset.labels.push(label);
                    dataset.files.push(path);
                }
                Err(e) => {
                    warn!(file = %path.display(), "skipping file: {e}");
                    dataset.skipped += 1;
                }
            }
        }
    }

    if dataset.is_empty() {
        return Err(HornError::Dataset(format!(
            "no usable .wav files under {}",
            dir.display()
        )));
    }
    Ok(dataset)
}

fn file_features(path: &Path, extractor: &FeatureExtractor) -> Result<FeatureVector> {
    let (samples, sample_rate) = read_wav(path)?;
    extractor.try_extract(&samples, sample_rate)
}

/// Shuffle `0..n` with `seed` and split off `ceil(n * test_fraction)` test indices.
///
/// Returns `(train, test)`. Both sides are non-empty.
///
/// # Errors
/// `HornError::Dataset` if `n < 2` or the fraction is outside `(0, 1)`.
pub fn train_test_split(
    n: usize,
    test_fraction: f32,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(HornError::Dataset(format!(
            "test fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    if n < 2 {
        return Err(HornError::Dataset(format!(
            "need at least 2 samples to split, got {n}"
        )));
    }

    let n_test = ((n as f64 * test_fraction as f64).ceil() as usize).clamp(1, n - 1);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = indices.split_off(n_test);
    Ok((train, indices))
}

/// Precision / recall / F1 for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClassReport {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub support: usize,
}

/// Held-out evaluation of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub accuracy: f32,
    /// Indexed by class id.
    pub classes: [ClassReport; 2],
    pub total: usize,
}

impl Evaluation {
    /// Score `predicted` against `actual`.
    pub fn from_predictions(actual: &[usize], predicted: &[usize]) -> Self {
        let total = actual.len().min(predicted.len());
        let pairs = || actual.iter().zip(predicted);
        let correct = pairs().filter(|(a, p)| a == p).count();

        let classes = [0usize, 1].map(|class| {
            let tp = pairs().filter(|&(&a, &p)| a == class && p == class).count();
            let predicted_pos = pairs().filter(|&(_, &p)| p == class).count();
            let support = pairs().filter(|&(&a, _)| a == class).count();
            let precision = ratio(tp, predicted_pos);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassReport {
                precision,
                recall,
                f1,
                support,
            }
        });

        Self {
            accuracy: ratio(correct, total),
            classes,
            total,
        }
    }

    fn macro_avg(&self) -> (f32, f32, f32) {
        let n = self.classes.len() as f32;
        let sum = |f: fn(&ClassReport) -> f32| self.classes.iter().map(f).sum::<f32>() / n;
        (sum(|c| c.precision), sum(|c| c.recall), sum(|c| c.f1))
    }

    fn weighted_avg(&self) -> (f32, f32, f32) {
        if self.total == 0 {
            return (0.0, 0.0, 0.0);
        }
        let total = self.total as f32;
        let sum = |f: fn(&ClassReport) -> f32| {
            self.classes
                .iter()
                .map(|c| f(c) * c.support as f32)
                .sum::<f32>()
                / total
        };
        (sum(|c| c.precision), sum(|c| c.recall), sum(|c| c.f1))
    }
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, c) in CLASS_NAMES.iter().zip(&self.classes) {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total
        )?;
        for (name, (p, r, f1)) in [
            ("macro avg", self.macro_avg()),
            ("weighted avg", self.weighted_avg()),
        ] {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, p, r, f1, self.total
            )?;
        }
        Ok(())
    }
}

/// Training knobs: the forest plus the held-out split.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub forest: ForestConfig,
    pub test_fraction: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            forest: ForestConfig::default(),
            test_fraction: 0.2,
        }
    }
}

/// Split `dataset`, fit a forest on the training side and score it on the
/// held-out side. The split reuses the forest seed.
///
/// # Errors
/// `HornError::Dataset` for degenerate datasets, inference errors while scoring.
pub fn train(dataset: &Dataset, config: &TrainingConfig) -> Result<(RandomForest, Evaluation)> {
    let (train_idx, test_idx) =
        train_test_split(dataset.len(), config.test_fraction, config.forest.seed)?;
    let (x_train, y_train) = dataset.subset(&train_idx);
    let (x_test, y_test) = dataset.subset(&test_idx);

    info!(
        train = x_train.len(),
        test = x_test.len(),
        trees = config.forest.n_trees,
        "fitting random forest"
    );
    let model = RandomForest::fit(&x_train, &y_train, &config.forest)?;

    let predicted = x_test
        .iter()
        .map(|x| model.predict(x))
        .collect::<Result<Vec<_>>>()?;
    let evaluation = Evaluation::from_predictions(&y_test, &predicted);
    info!(accuracy = evaluation.accuracy, "evaluation complete");

    Ok((model, evaluation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hound::{SampleFormat, WavSpec, WavWriter};

    const SR: u32 = 22_050;

    fn write_tone(path: &Path, freq: f32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: SR,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).expect("create wav");
        for i in 0..SR / 2 {
            let s = (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin();
            writer
                .write_sample((s * 0.5 * i16::MAX as f32) as i16)
                .expect("write sample");
        }
        writer.finalize().expect("finalize");
    }

    fn dataset_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let horn = dir.path().join("horn");
        let nothorn = dir.path().join("nothorn");
        std::fs::create_dir_all(&horn).expect("mkdir");
        std::fs::create_dir_all(&nothorn).expect("mkdir");
        for i in 0..6 {
            write_tone(&horn.join(format!("h{i}.wav")), 1_000.0 + 40.0 * i as f32);
            write_tone(&nothorn.join(format!("n{i}.wav")), 180.0 + 10.0 * i as f32);
        }
        std::fs::write(nothorn.join("broken.wav"), b"nope").expect("write");
        std::fs::write(horn.join("notes.txt"), b"ignored").expect("write");
        dir
    }

    #[test]
    fn dataset_scan_labels_folders_and_skips_bad_files() {
        let dir = dataset_dir();
        let dataset = load_dataset(dir.path(), &FeatureExtractor::new(44_100)).expect("load");
        assert_eq!(dataset.len(), 12);
        assert_eq!(dataset.class_counts(), [6, 6]);
        assert_eq!(dataset.skipped, 1);
        assert!(dataset.files[0].ends_with("horn/h0.wav"));
        assert_eq!(dataset.labels[0], 1);
    }

    #[test]
    fn missing_class_folder_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("horn")).expect("mkdir");
        let err = load_dataset(dir.path(), &FeatureExtractor::new(44_100)).unwrap_err();
        assert!(matches!(err, HornError::Dataset(_)));
    }

    #[test]
    fn split_is_deterministic_and_rounds_test_up() {
        let (train, test) = train_test_split(11, 0.2, 42).expect("split");
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);
        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..11).collect::<Vec<_>>());
        assert_eq!(train_test_split(11, 0.2, 42).expect("split"), (train, test));
    }

    #[test]
    fn split_rejects_degenerate_input() {
        assert!(train_test_split(1, 0.2, 42).is_err());
        assert!(train_test_split(10, 0.0, 42).is_err());
        assert!(train_test_split(10, 1.0, 42).is_err());
    }

    #[test]
    fn evaluation_matches_hand_computed_scores() {
        let actual = [1, 1, 1, 0, 0];
        let predicted = [1, 1, 0, 0, 1];
        let eval = Evaluation::from_predictions(&actual, &predicted);
        assert_relative_eq!(eval.accuracy, 0.6);
        assert_relative_eq!(eval.classes[1].precision, 2.0 / 3.0);
        assert_relative_eq!(eval.classes[1].recall, 2.0 / 3.0);
        assert_relative_eq!(eval.classes[0].precision, 0.5);
        assert_relative_eq!(eval.classes[0].recall, 0.5);
        assert_eq!(eval.classes[0].support, 2);

        let report = eval.to_string();
        assert!(report.contains("nothorn"));
        assert!(report.contains("weighted avg"));
    }

    #[test]
    fn train_separates_tones() {
        let dir = dataset_dir();
        let dataset = load_dataset(dir.path(), &FeatureExtractor::new(44_100)).expect("load");
        let config = TrainingConfig {
            forest: ForestConfig {
                n_trees: 25,
                ..ForestConfig::default()
            },
            test_fraction: 0.25,
        };
        let (model, eval) = train(&dataset, &config).expect("train");
        assert_eq!(model.n_trees(), 25);
        assert_eq!(eval.total, 3);
        assert_relative_eq!(eval.accuracy, 1.0);
    }

    #[test]
    fn dataset_features_are_noise_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        for (class, _) in LABELS {
            std::fs::create_dir_all(dir.path().join(class)).expect("mkdir");
            // far above the 2 kHz band edge
            write_tone(&dir.path().join(class).join("hiss.wav"), 6_000.0);
        }
        let dataset = load_dataset(dir.path(), &FeatureExtractor::new(44_100)).expect("load");
        assert_eq!(dataset.len(), 2);

        let (raw, rate) = read_wav(&dataset.files[0]).expect("read");
        let unfiltered = crate::dsp::Mfcc::new(rate, crate::N_MFCC)
            .mean_coefficients(&raw)
            .expect("mfcc");
        let filtered = dataset.features[0].as_slice();
        let gap = unfiltered
            .iter()
            .zip(filtered)
            .fold(0.0f32, |m, (a, b)| m.max((a - b).abs()));
        assert!(gap > 1.0, "filtered and raw features nearly equal, gap={gap}");
    }
}
