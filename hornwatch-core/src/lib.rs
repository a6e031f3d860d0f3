//! # hornwatch-core
//!
//! Vehicle horn detection engine: microphone capture, noise filtering,
//! MFCC features, random-forest classification and offline training.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture(ChunkAssembler) ──recording?──► AudioQueue (bounded)
//!                                                               │
//!                                              Pipeline thread (100 ms poll)
//!                                                               │
//!                                      mono → NoiseFilter → MFCC → FeatureVector
//!                                                               │
//!                                                HornClassifier::predict_proba
//!                                                               │
//!                                           broadcast::Sender<DetectionEvent>
//! ```
//!
//! The recording flag only gates the enqueue step. The capture stream stays
//! open until the engine is shut down.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod features;
pub mod inference;
pub mod ipc;
pub mod training;

// Convenience re-exports for downstream crates
pub use engine::{EngineConfig, HornEngine};
pub use error::HornError;
pub use features::{FeatureExtractor, FeatureVector, N_MFCC};
pub use inference::{HornClassifier, ModelHandle};
pub use ipc::events::{DetectionEvent, EngineStatus, HornLabel, RecordingAck};

/// Sample rate every feature vector is computed at (Hz).
pub const SAMPLE_RATE: u32 = 44_100;

/// Length of one classified chunk in seconds.
pub const CHUNK_SECONDS: f32 = 2.0;
