//! Typed audio chunk passed from the capture callback to the inference loop.

/// A fixed-length block of interleaved PCM samples at a known sample rate.
///
/// Produced once per completed capture block, consumed exactly once by the
/// pipeline thread.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Number of interleaved channels (1 = mono).
    pub channels: u16,
    /// Sample rate in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Mono chunk.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::interleaved(samples, 1, sample_rate)
    }

    pub fn interleaved(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Collapse to mono by averaging the channels of each frame.
    ///
    /// Mono input is returned as-is without copying. A trailing partial
    /// frame is discarded.
    pub fn into_mono(self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples;
        }
        self.mix_to_mono()
    }

    /// Channel average into a new buffer, leaving `self` intact.
    pub fn mix_to_mono(&self) -> Vec<f32> {
        let ch = self.channels as usize;
        self.samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }
}
