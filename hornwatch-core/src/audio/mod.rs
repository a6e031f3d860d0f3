//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread. It must not block, so
//! the only shared-state work it does is a relaxed load of the recording flag,
//! a non-blocking `try_send` into the bounded [`AudioQueue`](crate::buffering)
//! and a `try_recv` of a spare buffer from the [`BufferPool`]. It does not log.
//!
//! Devices deliver buffers of whatever size the backend picks. A
//! [`ChunkAssembler`] accumulates them into fixed 2 s blocks; the
//! [`CaptureGate`] then either enqueues a completed block (recording) or drops
//! it (not recording). The stream itself stays open either way.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! `AudioCapture` therefore must be created and dropped on the same thread.
//! The engine does this on its dedicated capture thread.

pub mod resample;
pub mod wav;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    buffering::{chunk::AudioChunk, BufferPool, PushOutcome, QueueProducer},
    error::{HornError, Result},
};
#[cfg(feature = "audio-cpal")]
use tracing::{info, warn};

/// What to ask the input device for.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Requested sample rate (Hz). Falls back to the device default if unsupported.
    pub sample_rate: u32,
    /// Block length handed to the pipeline, in seconds.
    pub chunk_seconds: f32,
    /// Channel count to prefer when the device offers several.
    pub preferred_channels: u16,
    /// Input device name; `None` uses the system default.
    pub preferred_device: Option<String>,
}

impl CaptureConfig {
    /// Frames per chunk at `rate`.
    pub fn chunk_frames(&self, rate: u32) -> usize {
        ((rate as f32 * self.chunk_seconds).round() as usize).max(1)
    }
}

/// Recording-flag gate in front of the queue producer.
///
/// Also carries the pool the pipeline returns analysed buffers to.
pub struct CaptureGate {
    recording: Arc<AtomicBool>,
    producer: QueueProducer,
    pool: BufferPool,
}

impl CaptureGate {
    pub fn new(recording: Arc<AtomicBool>, producer: QueueProducer, pool: BufferPool) -> Self {
        Self {
            recording,
            producer,
            pool,
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    /// Enqueue `chunk` if recording, otherwise drop it.
    ///
    /// Returns `None` when the chunk was dropped because recording is off.
    pub fn offer(&self, chunk: AudioChunk) -> Option<PushOutcome> {
        if !self.is_recording() {
            return None;
        }
        Some(self.producer.push(chunk))
    }
}

/// Accumulates interleaved device buffers into fixed-size chunks.
pub struct ChunkAssembler {
    buf: Vec<f32>,
    samples_per_chunk: usize,
    channels: u16,
    sample_rate: u32,
}

impl ChunkAssembler {
    pub fn new(chunk_frames: usize, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let samples_per_chunk = chunk_frames.max(1) * channels as usize;
        Self {
            buf: Vec::with_capacity(samples_per_chunk),
            samples_per_chunk,
            channels,
            sample_rate,
        }
    }

    /// Interleaved samples per completed chunk.
    pub fn chunk_samples(&self) -> usize {
        self.samples_per_chunk
    }

    /// Buffered samples not yet forming a whole chunk.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Append one device buffer; every completed chunk is offered to `gate`.
    ///
    /// When not recording the completed block is discarded and the buffer is
    /// reused. While recording the next buffer comes from the gate's pool.
    pub fn push<T: Copy>(&mut self, data: &[T], convert: fn(T) -> f32, gate: &CaptureGate) {
        let mut rest = data;
        while !rest.is_empty() {
            let room = self.samples_per_chunk - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend(rest[..take].iter().map(|&s| convert(s)));
            rest = &rest[take..];

            if self.buf.len() == self.samples_per_chunk {
                if gate.is_recording() {
                    let next = gate.pool().take(self.samples_per_chunk);
                    let full = std::mem::replace(&mut self.buf, next);
                    gate.offer(AudioChunk::interleaved(full, self.channels, self.sample_rate));
                } else {
                    self.buf.clear();
                }
            }
        }
    }
}

pub fn f32_sample(s: f32) -> f32 {
    s
}

pub fn i16_sample(s: i16) -> f32 {
    s as f32 / 32768.0
}

pub fn u16_sample(s: u16) -> f32 {
    (s as f32 - 32768.0) / 32768.0
}

pub fn u8_sample(s: u8) -> f32 {
    (s as f32 - 128.0) / 128.0
}

/// Handle to an active audio capture stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on Windows/macOS.
/// Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Actual capture sample rate (Hz).
    pub sample_rate: u32,
    /// Actual channel count.
    pub channels: u16,
    pub device_name: String,
}

#[cfg(feature = "audio-cpal")]
fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::F32 => Some(0),
        SampleFormat::I16 => Some(1),
        SampleFormat::U16 => Some(2),
        SampleFormat::U8 => Some(3),
        _ => None,
    }
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut assembler: ChunkAssembler,
    gate: CaptureGate,
    convert: fn(T) -> f32,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                assembler.push(data, convert, &gate);
            },
            |err| warn!("audio stream status: {err}"),
            None,
        )
        .map_err(|e| HornError::AudioStream(e.to_string()))
}

impl AudioCapture {
    /// Open the preferred (or default) input device and start streaming
    /// completed chunks through `gate`.
    ///
    /// Must be called from the thread that will also drop this value.
    ///
    /// # Errors
    /// `HornError::NoDefaultInputDevice` when no microphone is available,
    /// `HornError::AudioDevice` / `HornError::AudioStream` if cpal fails.
    #[cfg(feature = "audio-cpal")]
    pub fn open(gate: CaptureGate, config: &CaptureConfig) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = config.preferred_device.as_deref() {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = match selected_device.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| HornError::AudioDevice(e.to_string()))?;
                let fallback = devices.next().ok_or(HornError::NoDefaultInputDevice)?;
                warn!("no default input device, falling back to first available input");
                fallback
            }
        };
        let device_name = device.name().unwrap_or_default();
        info!(device = device_name.as_str(), "opening input device");

        let target = SampleRate(config.sample_rate);
        let best_range = device
            .supported_input_configs()
            .map_err(|e| HornError::AudioDevice(e.to_string()))?
            .filter(|range| {
                range.min_sample_rate() <= target && target <= range.max_sample_rate()
            })
            .filter_map(|range| format_rank(range.sample_format()).map(|rank| (rank, range)))
            .min_by_key(|(rank, range)| {
                (
                    range.channels() != config.preferred_channels,
                    range.channels(),
                    *rank,
                )
            })
            .map(|(_, range)| range);

        let supported = match best_range {
            Some(range) => range.with_sample_rate(target),
            None => {
                let fallback = device
                    .default_input_config()
                    .map_err(|e| HornError::AudioDevice(e.to_string()))?;
                warn!(
                    requested = config.sample_rate,
                    device_rate = fallback.sample_rate().0,
                    "device cannot capture at the requested rate, chunks will be resampled"
                );
                fallback
            }
        };

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let sample_format = supported.sample_format();
        let chunk_frames = config.chunk_frames(sample_rate);
        info!(sample_rate, channels, chunk_frames, ?sample_format, "audio config selected");

        let stream_config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let assembler = ChunkAssembler::new(chunk_frames, channels, sample_rate);
        gate.pool().fill(assembler.chunk_samples());

        let stream = match sample_format {
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, assembler, gate, f32_sample)?
            }
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, assembler, gate, i16_sample)?
            }
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, assembler, gate, u16_sample)?
            }
            SampleFormat::U8 => {
                build_stream::<u8>(&device, &stream_config, assembler, gate, u8_sample)?
            }
            fmt => {
                return Err(HornError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| HornError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
            channels,
            device_name,
        })
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open(_gate: CaptureGate, _config: &CaptureConfig) -> Result<Self> {
        Err(HornError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_audio_queue, OverflowPolicy, QueueConsumer};

    fn gate(recording: bool) -> (CaptureGate, QueueConsumer, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(recording));
        let (producer, consumer) = create_audio_queue(8, OverflowPolicy::DropOldest);
        let gate = CaptureGate::new(Arc::clone(&flag), producer, BufferPool::new(2));
        (gate, consumer, flag)
    }

    #[test]
    fn assembler_emits_fixed_size_chunks_across_buffers() {
        let (gate, consumer, _flag) = gate(true);
        let mut assembler = ChunkAssembler::new(4, 1, 8);

        assembler.push(&[0.1f32, 0.2, 0.3], f32_sample, &gate);
        assert!(consumer.is_empty());
        assembler.push(&[0.4f32, 0.5, 0.6, 0.7, 0.8, 0.9], f32_sample, &gate);

        let first = consumer.try_pop().expect("first chunk");
        assert_eq!(first.samples, vec![0.1, 0.2, 0.3, 0.4]);
        let second = consumer.try_pop().expect("second chunk");
        assert_eq!(second.samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert!(consumer.try_pop().is_none());
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn interleaved_chunks_keep_channel_count() {
        let (gate, consumer, _flag) = gate(true);
        let mut assembler = ChunkAssembler::new(2, 2, 44_100);
        assembler.push(&[1i16, 2, 3, 4], i16_sample, &gate);
        let chunk = consumer.try_pop().expect("chunk");
        assert_eq!(chunk.channels, 2);
        assert_eq!(chunk.frames(), 2);
        assert_eq!(chunk.sample_rate, 44_100);
    }

    #[test]
    fn blocks_are_dropped_while_not_recording() {
        let (gate, consumer, flag) = gate(false);
        let mut assembler = ChunkAssembler::new(2, 1, 8);
        assembler.push(&[0.1f32, 0.2, 0.3, 0.4], f32_sample, &gate);
        assert!(consumer.is_empty());

        flag.store(true, Ordering::Relaxed);
        assembler.push(&[0.5f32, 0.6], f32_sample, &gate);
        assert_eq!(consumer.try_pop().map(|c| c.samples), Some(vec![0.5, 0.6]));
    }

    #[test]
    fn assembler_refills_from_recycled_buffers() {
        let (gate, consumer, _flag) = gate(true);
        let mut assembler = ChunkAssembler::new(2, 1, 8);
        gate.pool().fill(assembler.chunk_samples());
        assert_eq!(gate.pool().available(), 2);

        assembler.push(&[0.1f32, 0.2], f32_sample, &gate);
        assert_eq!(gate.pool().available(), 1);

        let chunk = consumer.try_pop().expect("chunk");
        let ptr = chunk.samples.as_ptr();
        gate.pool().recycle(chunk.samples);
        assembler.push(&[0.3f32, 0.4, 0.5, 0.6], f32_sample, &gate);

        // spares are handed out in order, so the recycled buffer fills fourth
        assembler.push(&[0.7f32, 0.8], f32_sample, &gate);
        let drained: Vec<AudioChunk> = std::iter::from_fn(|| consumer.try_pop()).collect();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[2].samples, vec![0.7, 0.8]);
        assert_eq!(drained[2].samples.as_ptr(), ptr);
        assert_eq!(gate.pool().available(), 0);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn offer_reports_gate_state() {
        let (gate, _consumer, flag) = gate(false);
        assert_eq!(gate.offer(AudioChunk::new(vec![0.0], 8)), None);
        flag.store(true, Ordering::Relaxed);
        assert_eq!(
            gate.offer(AudioChunk::new(vec![0.0], 8)),
            Some(PushOutcome::Queued)
        );
    }

    #[test]
    fn integer_formats_map_to_unit_range() {
        assert_eq!(i16_sample(i16::MIN), -1.0);
        assert_eq!(u16_sample(32768), 0.0);
        assert_eq!(u8_sample(128), 0.0);
        assert_eq!(u8_sample(0), -1.0);
    }

    #[test]
    fn chunk_frames_rounds_to_whole_frames() {
        let config = CaptureConfig {
            sample_rate: 44_100,
            chunk_seconds: 2.0,
            preferred_channels: 1,
            preferred_device: None,
        };
        assert_eq!(config.chunk_frames(44_100), 88_200);
        assert_eq!(config.chunk_frames(48_000), 96_000);
    }
}
