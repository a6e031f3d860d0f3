//! Bounded SPSC chunk queue between the capture callback and the pipeline.
//!
//! Backed by a `crossbeam_channel::bounded` channel. When the pipeline falls
//! behind, the producer applies an [`OverflowPolicy`] instead of letting the
//! backlog grow without limit. The producer never blocks and never logs: the
//! capture callback runs on the OS audio thread. Drops are only counted here;
//! the pipeline reads the counter through a [`QueueMonitor`] and reports them.

pub mod chunk;
pub mod pool;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use self::chunk::AudioChunk;
pub use self::pool::BufferPool;

/// Default queue depth: 8 chunks ≈ 16 s of audio at 2 s per chunk.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// What to discard when a chunk arrives and the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued chunk so the newest audio is always analysed.
    #[default]
    DropOldest,
    /// Discard the incoming chunk and keep the backlog intact.
    DropNewest,
}

/// Result of a single [`QueueProducer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest chunk.
    EvictedOldest,
    /// The incoming chunk was discarded.
    DroppedNewest,
}

/// Producer half, owned by the capture callback.
pub struct QueueProducer {
    tx: Sender<AudioChunk>,
    /// Receiver clone used only to evict under `DropOldest`.
    evict_rx: Receiver<AudioChunk>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicUsize>,
}

/// Consumer half, owned by the pipeline thread.
pub struct QueueConsumer {
    rx: Receiver<AudioChunk>,
}

/// Read-only view of queue depth and drop count, for status reporting.
#[derive(Clone)]
pub struct QueueMonitor {
    tx: Sender<AudioChunk>,
    dropped: Arc<AtomicUsize>,
}

/// Create a matched producer/consumer pair with room for `capacity` chunks.
///
/// A capacity of 0 is raised to 1; a rendezvous channel would make every
/// push from the audio thread fail.
pub fn create_audio_queue(
    capacity: usize,
    policy: OverflowPolicy,
) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = bounded(capacity.max(1));
    let producer = QueueProducer {
        tx,
        evict_rx: rx.clone(),
        policy,
        dropped: Arc::new(AtomicUsize::new(0)),
    };
    (producer, QueueConsumer { rx })
}

impl QueueProducer {
    /// Enqueue a chunk without blocking, applying the overflow policy.
    pub fn push(&self, chunk: AudioChunk) -> PushOutcome {
        let mut pending = chunk;
        let mut outcome = PushOutcome::Queued;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(rejected)) => match self.policy {
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return PushOutcome::DroppedNewest;
                    }
                    OverflowPolicy::DropOldest => {
                        // The consumer may have popped in between; retry either way.
                        if self.evict_rx.try_recv().is_ok() {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            outcome = PushOutcome::EvictedOldest;
                        }
                        pending = rejected;
                    }
                },
                // Unreachable while `evict_rx` is alive; treat as a drop.
                Err(TrySendError::Disconnected(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return PushOutcome::DroppedNewest;
                }
            }
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl QueueConsumer {
    /// Pop the oldest chunk if one is ready.
    pub fn try_pop(&self) -> Option<AudioChunk> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the oldest chunk.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioChunk> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl QueueMonitor {
    /// Chunks currently waiting for the pipeline.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Chunks discarded by the overflow policy since the queue was created.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tag: f32) -> AudioChunk {
        AudioChunk::new(vec![tag; 4], 44_100)
    }

    fn tag_of(chunk: &AudioChunk) -> f32 {
        chunk.samples[0]
    }

    #[test]
    fn preserves_fifo_order() {
        let (producer, consumer) = create_audio_queue(8, OverflowPolicy::DropOldest);
        for tag in [1.0, 2.0, 3.0] {
            assert_eq!(producer.push(tagged(tag)), PushOutcome::Queued);
        }
        let drained: Vec<f32> = std::iter::from_fn(|| consumer.try_pop())
            .map(|c| tag_of(&c))
            .collect();
        assert_eq!(drained, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn drop_oldest_keeps_newest_chunks() {
        let (producer, consumer) = create_audio_queue(2, OverflowPolicy::DropOldest);
        producer.push(tagged(1.0));
        producer.push(tagged(2.0));
        assert_eq!(producer.push(tagged(3.0)), PushOutcome::EvictedOldest);

        let monitor = producer.monitor();
        assert_eq!(monitor.len(), 2);
        assert_eq!(monitor.dropped(), 1);

        assert_eq!(consumer.try_pop().map(|c| tag_of(&c)), Some(2.0));
        assert_eq!(consumer.try_pop().map(|c| tag_of(&c)), Some(3.0));
        assert!(consumer.try_pop().is_none());
    }

    #[test]
    fn drop_newest_keeps_backlog() {
        let (producer, consumer) = create_audio_queue(2, OverflowPolicy::DropNewest);
        producer.push(tagged(1.0));
        producer.push(tagged(2.0));
        assert_eq!(producer.push(tagged(3.0)), PushOutcome::DroppedNewest);
        assert_eq!(producer.monitor().dropped(), 1);

        assert_eq!(consumer.try_pop().map(|c| tag_of(&c)), Some(1.0));
        assert_eq!(consumer.try_pop().map(|c| tag_of(&c)), Some(2.0));
        assert!(consumer.is_empty());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (producer, consumer) = create_audio_queue(0, OverflowPolicy::DropNewest);
        assert_eq!(producer.push(tagged(1.0)), PushOutcome::Queued);
        assert_eq!(consumer.len(), 1);
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let (_producer, consumer) = create_audio_queue(1, OverflowPolicy::DropOldest);
        assert!(consumer.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn overflow_policy_uses_snake_case() {
        let json = serde_json::to_string(&OverflowPolicy::DropOldest).expect("serialize policy");
        assert_eq!(json, "\"drop_oldest\"");
        let parsed: OverflowPolicy =
            serde_json::from_str("\"drop_newest\"").expect("deserialize policy");
        assert_eq!(parsed, OverflowPolicy::DropNewest);
    }
}
