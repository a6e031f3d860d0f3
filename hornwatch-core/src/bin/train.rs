//! `hornwatch-train`: fit the horn classifier from a labelled WAV dataset.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hornwatch_core::{
    features::FeatureExtractor,
    inference::{ForestConfig, DEFAULT_MODEL_PATH},
    training::{load_dataset, train, TrainingConfig},
    SAMPLE_RATE,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "hornwatch-train", about = "Train the horn / not-horn classifier")]
struct Args {
    /// Directory containing `horn/` and `nothorn/` subfolders of .wav files.
    #[arg(long, default_value = "dataset")]
    dataset: PathBuf,

    /// Where to write the trained model.
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    output: PathBuf,

    /// Number of trees in the forest.
    #[arg(long, default_value_t = 300)]
    trees: usize,

    /// Seed for the split and the forest.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Share of files held out for evaluation.
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hornwatch_core=info")),
        )
        .init();

    let args = Args::parse();
    info!(dataset = %args.dataset.display(), trees = args.trees, seed = args.seed, "training");

    let extractor = FeatureExtractor::new(SAMPLE_RATE);
    let dataset = load_dataset(&args.dataset, &extractor)
        .with_context(|| format!("loading dataset from {}", args.dataset.display()))?;
    let [nothorn, horn] = dataset.class_counts();
    info!(files = dataset.len(), horn, nothorn, skipped = dataset.skipped, "dataset loaded");

    let config = TrainingConfig {
        forest: ForestConfig {
            n_trees: args.trees,
            seed: args.seed,
            ..ForestConfig::default()
        },
        test_fraction: args.test_fraction,
    };
    let (model, evaluation) = train(&dataset, &config).context("training failed")?;

    println!("Accuracy: {:.2}", evaluation.accuracy);
    println!();
    println!("Classification Report:");
    println!("{evaluation}");

    model
        .save(&args.output)
        .with_context(|| format!("saving model to {}", args.output.display()))?;
    println!("Model saved as {}", args.output.display());
    Ok(())
}
