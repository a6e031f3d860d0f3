//! Blocking inference loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Wait up to `poll_interval` for the next queued chunk (FIFO)
//! 2. Collapse to mono by channel averaging
//! 3. Resample to the configured rate if the device captured at another rate
//! 4. NoiseFilter → MFCC → per-coefficient mean (FeatureExtractor)
//! 5. Classify: label from predict, confidence from p(horn)
//! 6. Broadcast DetectionEvent and print the report line
//! ```
//!
//! Analysed capture buffers go back to the [`BufferPool`] for the callback to
//! refill. Overflow drops are counted by the queue producer and logged here,
//! off the audio thread.
//!
//! The loop keeps consuming regardless of the recording flag, so chunks that
//! were queued before a stop are still classified. It exits only when the
//! engine shutdown flag is set.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{chunk::AudioChunk, BufferPool, QueueConsumer, QueueMonitor},
    engine::EngineConfig,
    features::FeatureExtractor,
    inference::{classify, ModelHandle},
    ipc::events::{DetectionEvent, HornLabel},
};

/// Input frames per rubato call when a chunk needs resampling.
const RESAMPLE_BLOCK: usize = 1024;

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub chunks_in: AtomicUsize,
    pub chunks_resampled: AtomicUsize,
    pub extraction_failures: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub detections: AtomicUsize,
    pub horn_detections: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.chunks_in.store(0, Ordering::Relaxed);
        self.chunks_resampled.store(0, Ordering::Relaxed);
        self.extraction_failures.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.detections.store(0, Ordering::Relaxed);
        self.horn_detections.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_in: self.chunks_in.load(Ordering::Relaxed),
            chunks_resampled: self.chunks_resampled.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            horn_detections: self.horn_detections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_in: usize,
    pub chunks_resampled: usize,
    pub extraction_failures: usize,
    pub inference_errors: usize,
    pub detections: usize,
    pub horn_detections: usize,
}

/// All context the pipeline needs, passed as one struct so the thread closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub model: ModelHandle,
    pub extractor: FeatureExtractor,
    pub consumer: QueueConsumer,
    /// Depth and drop counter of the queue `consumer` reads from.
    pub queue: QueueMonitor,
    pub pool: BufferPool,
    pub shutdown: Arc<AtomicBool>,
    pub detection_tx: broadcast::Sender<DetectionEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Run the blocking inference loop until `ctx.shutdown` becomes true.
pub fn run(ctx: PipelineContext) {
    info!(
        model = ctx.model.classifier().describe().as_str(),
        poll_ms = ctx.config.poll_interval.as_millis() as u64,
        "pipeline started"
    );

    // Created lazily, keyed by the capture rate of the chunk that needed it.
    let mut resampler: Option<(u32, RateConverter)> = None;
    let mut dropped_seen = 0;

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }

        let popped = ctx.consumer.pop_timeout(ctx.config.poll_interval);
        report_drops(&ctx.queue, &mut dropped_seen);
        let Some(chunk) = popped else {
            continue;
        };
        ctx.diagnostics.chunks_in.fetch_add(1, Ordering::Relaxed);

        let Some(samples) = prepare_samples(&ctx, chunk, &mut resampler) else {
            continue;
        };

        let features = ctx.extractor.extract(&samples, ctx.config.sample_rate);
        ctx.pool.recycle(samples);
        let Some(features) = features else {
            ctx.diagnostics
                .extraction_failures
                .fetch_add(1, Ordering::Relaxed);
            continue;
        };

        let prediction = match classify(ctx.model.classifier(), &features) {
            Ok(p) => p,
            Err(e) => {
                ctx.diagnostics
                    .inference_errors
                    .fetch_add(1, Ordering::Relaxed);
                error!("inference failed: {e}");
                continue;
            }
        };

        let event = DetectionEvent {
            seq: ctx.seq.fetch_add(1, Ordering::Relaxed),
            label: prediction.label,
            confidence: prediction.confidence,
        };
        ctx.diagnostics.detections.fetch_add(1, Ordering::Relaxed);
        if event.label == HornLabel::Horn {
            ctx.diagnostics
                .horn_detections
                .fetch_add(1, Ordering::Relaxed);
        }

        if ctx.config.echo_reports {
            println!("{event}");
        }
        info!(
            seq = event.seq,
            label = event.label.as_str(),
            confidence = event.confidence,
            queued = ctx.consumer.len(),
            "chunk classified"
        );
        // No subscribers is fine.
        let _ = ctx.detection_tx.send(event);
    }

    let snapshot = ctx.diagnostics.snapshot();
    info!(
        chunks_in = snapshot.chunks_in,
        chunks_resampled = snapshot.chunks_resampled,
        extraction_failures = snapshot.extraction_failures,
        inference_errors = snapshot.inference_errors,
        detections = snapshot.detections,
        horn_detections = snapshot.horn_detections,
        dropped = ctx.queue.dropped(),
        "pipeline stopped"
    );
}

/// Log chunks the queue discarded since the last call; returns how many.
fn report_drops(queue: &QueueMonitor, seen: &mut usize) -> usize {
    let total = queue.dropped();
    let new = total.saturating_sub(*seen);
    if new > 0 {
        warn!(
            dropped = new,
            total_dropped = total,
            queued = queue.len(),
            "audio queue overflow: pipeline is falling behind"
        );
        *seen = total;
    }
    new
}

/// Mono samples at the configured rate, or `None` if the chunk must be skipped.
fn prepare_samples(
    ctx: &PipelineContext,
    chunk: AudioChunk,
    resampler: &mut Option<(u32, RateConverter)>,
) -> Option<Vec<f32>> {
    let capture_rate = chunk.sample_rate;
    let frames = chunk.frames();
    let mono = if chunk.channels == 1 {
        chunk.samples
    } else {
        let mono = chunk.mix_to_mono();
        ctx.pool.recycle(chunk.samples);
        mono
    };
    debug!(frames, capture_rate, "chunk dequeued");

    let target = ctx.config.sample_rate;
    if capture_rate == target {
        return Some(mono);
    }

    if resampler.as_ref().map(|(rate, _)| *rate) != Some(capture_rate) {
        match RateConverter::new(capture_rate, target, RESAMPLE_BLOCK) {
            Ok(rc) => *resampler = Some((capture_rate, rc)),
            Err(e) => {
                error!("failed to create resampler: {e}");
                ctx.diagnostics
                    .extraction_failures
                    .fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
    }
    let (_, rc) = resampler.as_mut()?;

    let converted = rc.process_block(&mono);
    ctx.pool.recycle(mono);
    match converted {
        Ok(out) => {
            ctx.diagnostics
                .chunks_resampled
                .fetch_add(1, Ordering::Relaxed);
            Some(out)
        }
        Err(e) => {
            warn!("dropping chunk that could not be resampled: {e}");
            ctx.diagnostics
                .extraction_failures
                .fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_audio_queue, OverflowPolicy};
    use crate::inference::stub::FixedClassifier;
    use std::time::Duration;

    fn context(sample_rate: u32) -> (PipelineContext, crate::buffering::QueueProducer) {
        let (producer, consumer) = create_audio_queue(4, OverflowPolicy::DropOldest);
        let (detection_tx, _) = broadcast::channel(16);
        let config = EngineConfig {
            sample_rate,
            poll_interval: Duration::from_millis(10),
            echo_reports: false,
            ..EngineConfig::default()
        };
        let ctx = PipelineContext {
            extractor: FeatureExtractor::new(sample_rate),
            config,
            model: ModelHandle::new(FixedClassifier::horn()),
            consumer,
            queue: producer.monitor(),
            pool: BufferPool::new(4),
            shutdown: Arc::new(AtomicBool::new(false)),
            detection_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        };
        (ctx, producer)
    }

    #[test]
    fn stereo_chunk_is_downmixed() {
        let (ctx, _producer) = context(44_100);
        let mut resampler = None;
        let chunk = AudioChunk::interleaved(vec![1.0, 0.0, 0.5, 0.5], 2, 44_100);
        let samples = prepare_samples(&ctx, chunk, &mut resampler).expect("samples");
        assert_eq!(samples, vec![0.5, 0.5]);
        assert!(resampler.is_none());
        // interleaved buffer is handed back once mixed down
        assert_eq!(ctx.pool.available(), 1);
    }

    #[test]
    fn foreign_rate_chunk_is_resampled() {
        let (ctx, _producer) = context(44_100);
        let mut resampler = None;
        let chunk = AudioChunk::new(vec![0.0; 96_000], 48_000);
        let samples = prepare_samples(&ctx, chunk, &mut resampler).expect("samples");
        assert_eq!(samples.len(), 88_200);
        assert_eq!(ctx.diagnostics.snapshot().chunks_resampled, 1);
    }

    #[test]
    fn loop_exits_on_shutdown_and_reports_counts() {
        let (ctx, producer) = context(44_100);
        let shutdown = Arc::clone(&ctx.shutdown);
        let diagnostics = Arc::clone(&ctx.diagnostics);
        let mut rx = ctx.detection_tx.subscribe();

        producer.push(AudioChunk::new(vec![0.0; 0], 44_100));
        let tone: Vec<f32> = (0..44_100)
            .map(|i| (2.0 * std::f32::consts::PI * 500.0 * i as f32 / 44_100.0).sin())
            .collect();
        producer.push(AudioChunk::new(tone, 44_100));

        let handle = std::thread::spawn(move || run(ctx));
        let event = rx.blocking_recv().expect("detection");
        assert_eq!(event.label, HornLabel::Horn);
        assert_eq!(event.seq, 0);

        shutdown.store(true, Ordering::Relaxed);
        handle.join().expect("pipeline thread");

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.chunks_in, 2);
        assert_eq!(snapshot.extraction_failures, 1);
        assert_eq!(snapshot.detections, 1);
        assert_eq!(snapshot.horn_detections, 1);
    }

    #[test]
    fn drops_are_reported_once() {
        let (producer, _consumer) = create_audio_queue(2, OverflowPolicy::DropOldest);
        let monitor = producer.monitor();
        let mut seen = 0;
        assert_eq!(report_drops(&monitor, &mut seen), 0);

        for _ in 0..5 {
            producer.push(AudioChunk::new(vec![0.0; 4], 44_100));
        }
        assert_eq!(report_drops(&monitor, &mut seen), 3);
        assert_eq!(report_drops(&monitor, &mut seen), 0);

        producer.push(AudioChunk::new(vec![0.0; 4], 44_100));
        assert_eq!(report_drops(&monitor, &mut seen), 1);
        assert_eq!(seen, 4);
    }

    #[test]
    fn analysed_buffers_return_to_pool() {
        let (ctx, producer) = context(44_100);
        let shutdown = Arc::clone(&ctx.shutdown);
        let pool = ctx.pool.clone();
        let mut rx = ctx.detection_tx.subscribe();

        let tone: Vec<f32> = (0..44_100)
            .map(|i| (2.0 * std::f32::consts::PI * 500.0 * i as f32 / 44_100.0).sin())
            .collect();
        let ptr = tone.as_ptr();
        producer.push(AudioChunk::new(tone, 44_100));

        let handle = std::thread::spawn(move || run(ctx));
        rx.blocking_recv().expect("detection");
        shutdown.store(true, Ordering::Relaxed);
        handle.join().expect("pipeline thread");

        assert_eq!(pool.available(), 1);
        let reused = pool.take(44_100);
        assert_eq!(reused.as_ptr(), ptr);
        assert!(reused.is_empty());
    }
}
