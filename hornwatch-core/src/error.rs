use thiserror::Error;

/// All errors produced by hornwatch-core.
#[derive(Debug, Error)]
pub enum HornError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("noise filter error: {0}")]
    Filter(String),

    #[error("feature extraction error: {0}")]
    FeatureExtraction(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("failed to load model from {path}: {reason}")]
    ModelLoad {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HornError>;
