//! `hornwatch-classify`: run the trained model over WAV files.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hornwatch_core::{
    audio::wav::read_wav,
    features::FeatureExtractor,
    inference::{classify_samples, ModelHandle, DEFAULT_MODEL_PATH},
    SAMPLE_RATE,
};
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "hornwatch-classify", about = "Classify WAV files as horn / not horn")]
struct Args {
    /// Trained model file.
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    model: PathBuf,

    /// Files to classify.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hornwatch_core=warn")),
        )
        .init();

    let args = Args::parse();
    let model = ModelHandle::load(&args.model)
        .with_context(|| format!("loading model {}", args.model.display()))?;
    let extractor = FeatureExtractor::new(SAMPLE_RATE);

    let mut failures = 0usize;
    for path in &args.files {
        let result = read_wav(path).and_then(|(samples, rate)| {
            classify_samples(model.classifier(), &extractor, &samples, rate)
        });
        match result {
            Ok(p) => println!(
                "{}: Prediction: {} (Confidence: {:.2})",
                path.display(),
                p.label,
                p.confidence
            ),
            Err(e) => {
                warn!(file = %path.display(), "cannot classify: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} files could not be classified", args.files.len());
    }
    Ok(())
}
