//! `HornEngine`: top-level lifecycle controller and application context.
//!
//! ## Lifecycle
//!
//! ```text
//! HornEngine::new()
//!     └─► start()                → device open, capture + pipeline threads running
//!         ├─► start_recording()  → completed chunks are enqueued
//!         ├─► stop_recording()   → completed chunks are dropped, stream stays open
//!         └─► shutdown()         → both threads exit, stream released
//! ```
//!
//! `start_recording()` / `stop_recording()` are unconditional stores: calling
//! them twice is harmless and they never fail.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! `AudioCapture` is therefore created *inside* a dedicated capture thread so
//! it never crosses a thread boundary. A sync oneshot channel propagates any
//! open-device errors back to the `start()` caller. The inference loop runs on
//! its own thread and never touches the device.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    audio::{AudioCapture, CaptureConfig, CaptureGate},
    buffering::{
        create_audio_queue, pool::DEFAULT_SPARE_BUFFERS, BufferPool, OverflowPolicy, QueueMonitor,
        DEFAULT_QUEUE_DEPTH,
    },
    error::{HornError, Result},
    features::FeatureExtractor,
    inference::ModelHandle,
    ipc::events::{DetectionEvent, EngineStatus, RecordingAck},
    CHUNK_SECONDS, SAMPLE_RATE,
};

/// Broadcast channel capacity: 64 detection events buffered for slow consumers.
const BROADCAST_CAP: usize = 64;

/// How often the capture thread re-checks the shutdown flag.
const CAPTURE_POLL: Duration = Duration::from_millis(50);

/// Configuration for `HornEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate features are computed at (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Chunk length in seconds. Default: 2.0.
    pub chunk_seconds: f32,
    /// Bounded queue capacity in chunks. Default: 8.
    pub max_queue_depth: usize,
    pub overflow_policy: OverflowPolicy,
    /// How long the inference loop waits for a chunk before re-checking
    /// the shutdown flag. Default: 100 ms.
    pub poll_interval: Duration,
    /// Input device name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    /// Default: 1 (mono).
    pub preferred_channels: u16,
    /// Print one `Prediction: ...` line per classified chunk on stdout.
    pub echo_reports: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            chunk_seconds: CHUNK_SECONDS,
            max_queue_depth: DEFAULT_QUEUE_DEPTH,
            overflow_policy: OverflowPolicy::default(),
            poll_interval: Duration::from_millis(100),
            preferred_input_device: None,
            preferred_channels: 1,
            echo_reports: true,
        }
    }
}

impl EngineConfig {
    /// Frames per chunk at the configured rate (88200 by default).
    pub fn chunk_frames(&self) -> usize {
        self.capture_config().chunk_frames(self.sample_rate)
    }

    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            chunk_seconds: self.chunk_seconds,
            preferred_channels: self.preferred_channels,
            preferred_device: self.preferred_input_device.clone(),
        }
    }
}

/// The top-level engine handle.
///
/// `HornEngine` is `Send + Sync`; all fields use interior mutability.
/// Wrap in `Arc<HornEngine>` to share between HTTP handlers.
pub struct HornEngine {
    config: EngineConfig,
    model: ModelHandle,
    /// Gates enqueueing in the capture callback.
    recording: Arc<AtomicBool>,
    /// Tells the capture and inference threads to exit.
    shutdown: Arc<AtomicBool>,
    /// `true` once `start()` / `start_detached()` has succeeded.
    started: AtomicBool,
    detection_tx: broadcast::Sender<DetectionEvent>,
    /// Monotonically increasing detection sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    queue: Mutex<Option<QueueMonitor>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl HornEngine {
    /// Create a new engine. Nothing runs until `start()`.
    pub fn new(config: EngineConfig, model: ModelHandle) -> Self {
        let (detection_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            model,
            recording: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            detection_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            queue: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open the input device and start the capture and inference threads.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then returns.
    /// Recording starts off; chunks are dropped until `start_recording()`.
    ///
    /// # Errors
    /// - `HornError::AlreadyRunning` if already started.
    /// - `HornError::NoDefaultInputDevice` / `HornError::AudioDevice` /
    ///   `HornError::AudioStream` on device error.
    pub fn start(&self) -> Result<()> {
        let gate = self.spawn_pipeline()?;
        let capture_config = self.config.capture_config();
        let shutdown = Arc::clone(&self.shutdown);

        // Sync oneshot: capture thread signals open success/failure to start().
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<(String, u32, u16)>>();

        let spawned = std::thread::Builder::new()
            .name("hornwatch-capture".into())
            .spawn(move || {
                // Must happen on THIS thread: cpal::Stream is !Send.
                let capture = match AudioCapture::open(gate, &capture_config) {
                    Ok(c) => {
                        let _ = open_tx.send(Ok((c.device_name.clone(), c.sample_rate, c.channels)));
                        c
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(CAPTURE_POLL);
                }

                // Stream drops here, releasing the audio device on this thread.
                drop(capture);
                info!("capture stopped");
            })
            .map_err(HornError::Io);

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shutdown();
                return Err(e);
            }
        };
        self.threads.lock().push(handle);

        match open_rx.recv() {
            Ok(Ok((device, sample_rate, channels))) => {
                info!(device = device.as_str(), sample_rate, channels, "engine started");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("failed to open input device: {e}");
                self.shutdown();
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent, so the capture thread panicked?
                self.shutdown();
                Err(HornError::Other(anyhow::anyhow!(
                    "capture thread died unexpectedly"
                )))
            }
        }
    }

    /// Start only the inference loop and hand back the enqueue side.
    ///
    /// Used to drive the pipeline from a source other than a live device
    /// (file replay, tests). Chunks offered through the returned gate are
    /// subject to the recording flag exactly like device audio.
    ///
    /// # Errors
    /// `HornError::AlreadyRunning` if already started.
    pub fn start_detached(&self) -> Result<CaptureGate> {
        let gate = self.spawn_pipeline()?;
        info!("engine started without a capture device");
        Ok(gate)
    }

    fn spawn_pipeline(&self) -> Result<CaptureGate> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HornError::AlreadyRunning);
        }
        self.shutdown.store(false, Ordering::SeqCst);
        self.diagnostics.reset();

        let (producer, consumer) =
            create_audio_queue(self.config.max_queue_depth, self.config.overflow_policy);
        *self.queue.lock() = Some(producer.monitor());
        let pool = BufferPool::new(DEFAULT_SPARE_BUFFERS);

        let ctx = pipeline::PipelineContext {
            config: self.config.clone(),
            model: self.model.clone(),
            extractor: FeatureExtractor::new(self.config.sample_rate),
            consumer,
            queue: producer.monitor(),
            pool: pool.clone(),
            shutdown: Arc::clone(&self.shutdown),
            detection_tx: self.detection_tx.clone(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        let handle = std::thread::Builder::new()
            .name("hornwatch-pipeline".into())
            .spawn(move || pipeline::run(ctx))
            .map_err(|e| {
                self.started.store(false, Ordering::SeqCst);
                HornError::Io(e)
            })?;
        self.threads.lock().push(handle);

        Ok(CaptureGate::new(Arc::clone(&self.recording), producer, pool))
    }

    /// Begin enqueueing captured chunks. Idempotent.
    pub fn start_recording(&self) -> RecordingAck {
        self.recording.store(true, Ordering::Relaxed);
        info!("recording started");
        RecordingAck::started()
    }

    /// Stop enqueueing captured chunks. Already queued chunks are still
    /// classified. Idempotent.
    pub fn stop_recording(&self) -> RecordingAck {
        self.recording.store(false, Ordering::Relaxed);
        info!("recording stopped");
        RecordingAck::stopped()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> EngineStatus {
        if self.is_recording() {
            EngineStatus::Recording
        } else {
            EngineStatus::Stopped
        }
    }

    /// Chunks waiting for the inference loop.
    pub fn queued_chunks(&self) -> usize {
        self.queue.lock().as_ref().map_or(0, QueueMonitor::len)
    }

    /// Chunks discarded by the overflow policy since start.
    pub fn dropped_chunks(&self) -> usize {
        self.queue.lock().as_ref().map_or(0, QueueMonitor::dropped)
    }

    /// Subscribe to live detection events.
    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detection_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Signal both threads to exit and wait for them.
    ///
    /// Queued chunks that have not been classified yet are discarded.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!(thread = name.as_str(), "engine thread panicked");
            }
        }
        if self.started.swap(false, Ordering::SeqCst) {
            info!("engine shut down");
        }
    }
}

impl Drop for HornEngine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::stub::FixedClassifier;

    fn engine() -> HornEngine {
        HornEngine::new(
            EngineConfig {
                echo_reports: false,
                ..EngineConfig::default()
            },
            ModelHandle::new(FixedClassifier::horn()),
        )
    }

    #[test]
    fn default_chunk_is_two_seconds_at_44k() {
        assert_eq!(EngineConfig::default().chunk_frames(), 88_200);
    }

    #[test]
    fn start_twice_stays_recording() {
        let engine = engine();
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert_eq!(engine.start_recording(), RecordingAck::started());
        assert_eq!(engine.start_recording(), RecordingAck::started());
        assert!(engine.is_recording());
        assert_eq!(engine.status(), EngineStatus::Recording);
    }

    #[test]
    fn start_then_stop_is_stopped() {
        let engine = engine();
        engine.start_recording();
        assert_eq!(engine.stop_recording(), RecordingAck::stopped());
        assert!(!engine.is_recording());
        assert_eq!(engine.stop_recording(), RecordingAck::stopped());
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    #[test]
    fn detached_start_rejects_second_start() {
        let engine = engine();
        let _gate = engine.start_detached().expect("start");
        assert!(matches!(
            engine.start_detached(),
            Err(HornError::AlreadyRunning)
        ));
        engine.shutdown();
        assert!(engine.start_detached().is_ok());
        engine.shutdown();
    }

    #[test]
    fn queue_stats_are_zero_before_start() {
        let engine = engine();
        assert_eq!(engine.queued_chunks(), 0);
        assert_eq!(engine.dropped_chunks(), 0);
    }
}
