//! Random forest of Gini decision trees.
//!
//! ## Training
//!
//! Each tree is grown on a bootstrap resample of the training set. At every
//! node `max_features` candidate features (default `sqrt(n_features)`) are
//! drawn without replacement; the threshold minimising weighted Gini impurity
//! is chosen among midpoints of consecutive distinct values. Trees grow until
//! leaves are pure or too small to split.
//!
//! ## Prediction
//!
//! `predict_proba` averages the class distribution of the leaf reached in
//! each tree.
//!
//! ## Model file
//!
//! JSON of [`RandomForest`]. Loading validates structure so a corrupt
//! file fails at startup, not on the first chunk.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HornError, Result};
use crate::features::{FeatureVector, N_MFCC};
use crate::inference::HornClassifier;

const N_CLASSES: usize = 2;
const FORMAT_VERSION: u32 = 1;

/// Hyper-parameters for [`RandomForest::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees. Default: 300.
    pub n_trees: usize,
    /// Maximum depth, `None` for fully grown trees.
    pub max_depth: Option<usize>,
    /// Minimum samples required to split a node. Default: 2.
    pub min_samples_split: usize,
    /// Minimum samples in each child. Default: 1.
    pub min_samples_leaf: usize,
    /// Candidate features per split, `None` for `sqrt(n_features)`.
    pub max_features: Option<usize>,
    /// Grow each tree on a bootstrap resample. Default: true.
    pub bootstrap: bool,
    /// RNG seed. Default: 42.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 300,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        proba: [f32; N_CLASSES],
    },
}

/// One decision tree, nodes stored in a flat arena rooted at index 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn leaf_proba(&self, x: &[f32]) -> [f32; N_CLASSES] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { proba } => return *proba,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every child index must point forward inside the arena, which also
    /// rules out cycles.
    fn validate(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {idx} splits on feature {feature}"));
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!("node {idx} has invalid child {child}"));
                        }
                    }
                }
                Node::Leaf { proba } => {
                    if proba.iter().any(|p| !p.is_finite()) {
                        return Err(format!("leaf {idx} has non-finite probabilities"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Trained ensemble. Immutable after [`RandomForest::fit`] or [`RandomForest::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    format_version: u32,
    n_features: usize,
    config: ForestConfig,
    trees: Vec<DecisionTree>,
}

struct TreeBuilder<'a> {
    x: &'a [FeatureVector],
    y: &'a [usize],
    config: &'a ForestConfig,
    max_features: usize,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f32,
    impurity: f64,
}

fn gini(counts: &[usize; N_CLASSES], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

impl TreeBuilder<'_> {
    fn class_counts(&self, indices: &[usize]) -> [usize; N_CLASSES] {
        let mut counts = [0usize; N_CLASSES];
        for &i in indices {
            counts[self.y[i]] += 1;
        }
        counts
    }

    fn leaf(&mut self, counts: [usize; N_CLASSES]) -> usize {
        let total = counts.iter().sum::<usize>().max(1) as f32;
        let proba = [counts[0] as f32 / total, counts[1] as f32 / total];
        self.nodes.push(Node::Leaf { proba });
        self.nodes.len() - 1
    }

    fn best_split_on(&self, feature: usize, indices: &[usize]) -> Option<Split> {
        let mut pairs: Vec<(f32, usize)> = indices
            .iter()
            .map(|&i| (self.x[i].0[feature], self.y[i]))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let total = self.class_counts(indices);
        let n = pairs.len();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let mut left = [0usize; N_CLASSES];
        let mut best: Option<Split> = None;

        for i in 1..n {
            left[pairs[i - 1].1] += 1;
            let (lo, hi) = (pairs[i - 1].0, pairs[i].0);
            if lo == hi || i < min_leaf || n - i < min_leaf {
                continue;
            }
            let right = [total[0] - left[0], total[1] - left[1]];
            let impurity =
                (i as f64 * gini(&left, i) + (n - i) as f64 * gini(&right, n - i)) / n as f64;
            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                let mid = lo + (hi - lo) / 2.0;
                // Midpoint can round up to `hi` for adjacent floats.
                let threshold = if mid < hi { mid } else { lo };
                best = Some(Split {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
        best
    }

    fn find_split(&mut self, indices: &[usize]) -> Option<Split> {
        let n_features = N_MFCC;
        let mut candidates = sample(&mut *self.rng, n_features, self.max_features).into_vec();
        let mut best: Option<Split> = None;
        for &feature in &candidates {
            if let Some(split) = self.best_split_on(feature, indices) {
                if best.as_ref().map_or(true, |b| split.impurity < b.impurity) {
                    best = Some(split);
                }
            }
        }
        if best.is_some() {
            return best;
        }
        // Every sampled feature was constant here; fall back to the rest.
        candidates.sort_unstable();
        (0..n_features)
            .filter(|f| candidates.binary_search(f).is_err())
            .filter_map(|f| self.best_split_on(f, indices))
            .min_by(|a, b| a.impurity.total_cmp(&b.impurity))
    }

    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&indices);
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.config.max_depth.is_some_and(|d| depth >= d);
        if pure || depth_reached || indices.len() < self.config.min_samples_split.max(2) {
            return self.leaf(counts);
        }

        let Some(split) = self.find_split(&indices) else {
            return self.leaf(counts);
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x[i].0[split.feature] <= split.threshold);

        // Reserve this node's slot before its children so indices point forward.
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { proba: [0.0; N_CLASSES] });
        let left = self.grow(left_idx, depth + 1);
        let right = self.grow(right_idx, depth + 1);
        self.nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }
}

impl RandomForest {
    /// Fit a forest on `x` / `y` (`y` ∈ {0, 1}).
    ///
    /// # Errors
    /// `HornError::Dataset` for empty input, mismatched lengths or labels
    /// outside {0, 1}.
    pub fn fit(x: &[FeatureVector], y: &[usize], config: &ForestConfig) -> Result<Self> {
        if x.is_empty() {
            return Err(HornError::Dataset("no training samples".into()));
        }
        if x.len() != y.len() {
            return Err(HornError::Dataset(format!(
                "{} feature vectors but {} labels",
                x.len(),
                y.len()
            )));
        }
        if let Some(bad) = y.iter().find(|&&label| label >= N_CLASSES) {
            return Err(HornError::Dataset(format!("label {bad} is not 0 or 1")));
        }
        if config.n_trees == 0 {
            return Err(HornError::Dataset("forest needs at least one tree".into()));
        }

        let max_features = config
            .max_features
            .unwrap_or_else(|| (N_MFCC as f64).sqrt() as usize)
            .clamp(1, N_MFCC);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let n = x.len();

        let mut trees = Vec::with_capacity(config.n_trees);
        for tree_idx in 0..config.n_trees {
            let indices: Vec<usize> = if config.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            let mut builder = TreeBuilder {
                x,
                y,
                config,
                max_features,
                rng: &mut rng,
                nodes: Vec::new(),
            };
            builder.grow(indices, 0);
            let tree = DecisionTree {
                nodes: builder.nodes,
            };
            debug!(tree = tree_idx, nodes = tree.node_count(), "tree grown");
            trees.push(tree);
        }

        info!(
            trees = trees.len(),
            samples = n,
            max_features,
            "random forest fitted"
        );
        Ok(Self {
            format_version: FORMAT_VERSION,
            n_features: N_MFCC,
            config: config.clone(),
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Write the model as JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read and validate a model file.
    ///
    /// # Errors
    /// `HornError::ModelNotFound` if `path` does not exist,
    /// `HornError::ModelLoad` if it is not a valid forest.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HornError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        let load_err = |reason: String| HornError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };
        let reader = BufReader::new(File::open(path)?);
        let forest: Self = serde_json::from_reader(reader).map_err(|e| load_err(e.to_string()))?;

        if forest.format_version != FORMAT_VERSION {
            return Err(load_err(format!(
                "unsupported format version {}",
                forest.format_version
            )));
        }
        if forest.n_features != N_MFCC {
            return Err(load_err(format!(
                "model expects {} features, extractor produces {N_MFCC}",
                forest.n_features
            )));
        }
        if forest.trees.is_empty() {
            return Err(load_err("model has no trees".into()));
        }
        for (i, tree) in forest.trees.iter().enumerate() {
            tree.validate(forest.n_features)
                .map_err(|reason| load_err(format!("tree {i}: {reason}")))?;
        }
        Ok(forest)
    }
}

impl HornClassifier for RandomForest {
    fn predict_proba(&self, features: &FeatureVector) -> Result<[f32; 2]> {
        if self.trees.is_empty() {
            return Err(HornError::Inference("forest has no trees".into()));
        }
        if features.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(HornError::Inference("non-finite feature value".into()));
        }
        let mut sum = [0f32; N_CLASSES];
        for tree in &self.trees {
            let proba = tree.leaf_proba(features.as_slice());
            sum[0] += proba[0];
            sum[1] += proba[1];
        }
        let n = self.trees.len() as f32;
        Ok([sum[0] / n, sum[1] / n])
    }

    fn describe(&self) -> String {
        format!(
            "random forest ({} trees, {} features)",
            self.trees.len(),
            self.n_features
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Class 1 has large first coefficients, class 0 small ones.
    fn separable(n_per_class: usize) -> (Vec<FeatureVector>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..n_per_class {
            let jitter = (i as f32 * 0.37).sin() * 0.5;
            let mut horn = [0f32; N_MFCC];
            let mut other = [0f32; N_MFCC];
            for k in 0..N_MFCC {
                horn[k] = 10.0 + jitter + k as f32;
                other[k] = -10.0 - jitter - k as f32;
            }
            x.push(FeatureVector(horn));
            y.push(1);
            x.push(FeatureVector(other));
            y.push(0);
        }
        (x, y)
    }

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_trees: 15,
            ..ForestConfig::default()
        }
    }

    #[test]
    fn separates_linearly_separable_classes() {
        let (x, y) = separable(20);
        let forest = RandomForest::fit(&x, &y, &small_config()).expect("fit");
        assert_eq!(forest.n_trees(), 15);
        for (features, &label) in x.iter().zip(&y) {
            assert_eq!(forest.predict(features).expect("predict"), label);
        }
        let proba = forest.predict_proba(&x[0]).expect("proba");
        assert!((proba[0] + proba[1] - 1.0).abs() < 1e-5);
        assert!(proba[1] > 0.9);
    }

    #[test]
    fn same_seed_gives_same_forest() {
        let (x, y) = separable(10);
        let a = RandomForest::fit(&x, &y, &small_config()).expect("fit a");
        let b = RandomForest::fit(&x, &y, &small_config()).expect("fit b");
        let probe = FeatureVector([0.5; N_MFCC]);
        assert_eq!(
            a.predict_proba(&probe).expect("a"),
            b.predict_proba(&probe).expect("b")
        );
    }

    #[test]
    fn single_class_forest_predicts_that_class() {
        let x = vec![FeatureVector([1.0; N_MFCC]); 4];
        let y = vec![0; 4];
        let forest = RandomForest::fit(&x, &y, &small_config()).expect("fit");
        assert_eq!(forest.predict_proba(&x[0]).expect("proba"), [1.0, 0.0]);
    }

    #[test]
    fn rejects_bad_labels_and_empty_input() {
        let x = vec![FeatureVector([0.0; N_MFCC])];
        assert!(RandomForest::fit(&x, &[2], &small_config()).is_err());
        assert!(RandomForest::fit(&[], &[], &small_config()).is_err());
        assert!(RandomForest::fit(&x, &[0, 1], &small_config()).is_err());
    }

    #[test]
    fn save_then_load_predicts_identically() {
        let (x, y) = separable(8);
        let forest = RandomForest::fit(&x, &y, &small_config()).expect("fit");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("models").join("forest.json");
        forest.save(&path).expect("save");

        let loaded = RandomForest::load(&path).expect("load");
        assert_eq!(loaded.n_trees(), forest.n_trees());
        for features in &x {
            assert_eq!(
                loaded.predict_proba(features).expect("loaded"),
                forest.predict_proba(features).expect("original")
            );
        }
    }

    #[test]
    fn missing_file_is_model_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = RandomForest::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, HornError::ModelNotFound { .. }));
    }

    #[test]
    fn garbage_file_is_model_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage.json");
        std::fs::write(&path, b"not a model").expect("write");
        let err = RandomForest::load(&path).unwrap_err();
        assert!(matches!(err, HornError::ModelLoad { .. }));
    }

    #[test]
    fn non_finite_features_are_an_inference_error() {
        let (x, y) = separable(10);
        let config = ForestConfig {
            n_trees: 3,
            ..ForestConfig::default()
        };
        let forest = RandomForest::fit(&x, &y, &config).expect("fit");
        let mut bad = x[0];
        bad.0[4] = f32::NAN;
        assert!(matches!(
            forest.predict_proba(&bad),
            Err(HornError::Inference(_))
        ));
    }

    #[test]
    fn cyclic_tree_is_rejected() {
        let tree = DecisionTree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.0,
                left: 0,
                right: 0,
            }],
        };
        assert!(tree.validate(N_MFCC).is_err());
    }
}
