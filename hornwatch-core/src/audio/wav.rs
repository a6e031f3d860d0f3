//! WAV file loading for training data and offline classification.

use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::{
    buffering::chunk::AudioChunk,
    error::{HornError, Result},
};

/// Read a WAV file as mono f32 samples in `[-1, 1]` plus its sample rate.
///
/// Multi-channel files are downmixed by averaging channels.
///
/// # Errors
/// `HornError::Wav` if hound cannot decode the file,
/// `HornError::Dataset` for bit depths hound reports but cannot be scaled.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(HornError::Dataset(format!(
                    "{}: unsupported bit depth {}",
                    path.display(),
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let mono = AudioChunk::interleaved(samples, spec.channels, spec.sample_rate).into_mono();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write(path: &Path, spec: WavSpec, frames: &[Vec<i32>]) {
        let mut writer = WavWriter::create(path, spec).expect("create wav");
        for frame in frames {
            for &s in frame {
                match spec.bits_per_sample {
                    8 => writer.write_sample(s as i8).expect("write"),
                    16 => writer.write_sample(s as i16).expect("write"),
                    _ => writer.write_sample(s).expect("write"),
                }
            }
        }
        writer.finalize().expect("finalize");
    }

    #[test]
    fn reads_16_bit_mono() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mono.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write(&path, spec, &[vec![0], vec![16_384], vec![-32_768]]);

        let (samples, rate) = read_wav(&path).expect("read");
        assert_eq!(rate, 22_050);
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn stereo_is_downmixed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write(&path, spec, &[vec![16_384, 0], vec![-16_384, -16_384]]);

        let (samples, _) = read_wav(&path).expect("read");
        assert_eq!(samples, vec![0.25, -0.5]);
    }

    #[test]
    fn reads_float_samples() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).expect("create");
        for s in [0.25f32, -0.75] {
            writer.write_sample(s).expect("write");
        }
        writer.finalize().expect("finalize");

        let (samples, _) = read_wav(&path).expect("read");
        assert_eq!(samples, vec![0.25, -0.75]);
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"not a wav file").expect("write");
        assert!(matches!(read_wav(&path), Err(HornError::Wav(_))));
    }
}
