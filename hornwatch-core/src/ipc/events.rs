//! Event and acknowledgement types shared with the command surface.
//!
//! | Type | Produced by |
//! |------|-------------|
//! | `DetectionEvent` | pipeline, one per classified chunk |
//! | `RecordingAck` | `start_recording` / `stop_recording` |
//! | `EngineStatus` | status queries |

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Detection events
// ---------------------------------------------------------------------------

/// Binary classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HornLabel {
    Horn,
    NotHorn,
}

impl HornLabel {
    /// Class id the classifier uses for horn sounds.
    pub const HORN_CLASS: usize = 1;

    /// Horn iff the predicted class is [`HornLabel::HORN_CLASS`].
    pub fn from_class(class: usize) -> Self {
        if class == Self::HORN_CLASS {
            HornLabel::Horn
        } else {
            HornLabel::NotHorn
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HornLabel::Horn => "Horn",
            HornLabel::NotHorn => "Not Horn",
        }
    }
}

impl fmt::Display for HornLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted once per successfully classified chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub label: HornLabel,
    /// Probability of the horn class, whichever label won.
    pub confidence: f32,
}

impl fmt::Display for DetectionEvent {
    /// The human-readable report line, e.g. `Prediction: Horn (Confidence: 0.90)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Prediction: {} (Confidence: {:.2})",
            self.label, self.confidence
        )
    }
}

// ---------------------------------------------------------------------------
// Recording commands
// ---------------------------------------------------------------------------

/// Acknowledgement payload returned by the recording commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingAck {
    pub status: String,
}

impl RecordingAck {
    pub fn started() -> Self {
        Self {
            status: "Recording started".into(),
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: "Recording stopped".into(),
        }
    }
}

/// Coarse engine state. Capture is open in both states; only enqueueing differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Stopped,
    Recording,
}
