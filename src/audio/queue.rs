//! Lock-free sample queues between the audio callbacks and the network
//!
//! Each queue is a fixed-capacity single-producer single-consumer ring of
//! mono i16 samples. The two halves are separate owned values, so the type
//! system keeps exactly one producer and one consumer alive per queue.
//! Overflow drops the newest samples and underflow substitutes silence; both
//! only show up in the counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::constants::SAMPLE_QUEUE_CAPACITY;

/// Overflow/underflow counters shared by both halves
#[derive(Debug, Default)]
pub struct QueueStats {
    dropped: AtomicU64,
    silenced: AtomicU64,
}

impl QueueStats {
    /// Samples discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Samples replaced by silence because the queue was empty
    pub fn silenced(&self) -> u64 {
        self.silenced.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMetrics {
    pub len: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub silenced: u64,
}

/// Constructor for a producer/consumer pair
pub struct SampleQueue;

impl SampleQueue {
    /// A queue of [`SAMPLE_QUEUE_CAPACITY`] samples
    pub fn new() -> (SampleProducer, SampleConsumer) {
        Self::with_capacity(SAMPLE_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (SampleProducer, SampleConsumer) {
        let (prod, cons) = HeapRb::<i16>::new(capacity).split();
        let stats = Arc::new(QueueStats::default());
        (
            SampleProducer {
                inner: prod,
                stats: stats.clone(),
            },
            SampleConsumer { inner: cons, stats },
        )
    }
}

/// Write half of a sample queue
pub struct SampleProducer {
    inner: HeapProd<i16>,
    stats: Arc<QueueStats>,
}

impl SampleProducer {
    /// Push one sample. Returns false and counts a drop when full.
    #[inline]
    pub fn push(&mut self, sample: i16) -> bool {
        match self.inner.try_push(sample) {
            Ok(()) => true,
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Push as many samples as fit; the excess is dropped
    pub fn push_slice(&mut self, samples: &[i16]) -> usize {
        let pushed = self.inner.push_slice(samples);
        let dropped = samples.len() - pushed;
        if dropped > 0 {
            self.stats.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        pushed
    }

    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }
}

/// Read half of a sample queue
pub struct SampleConsumer {
    inner: HeapCons<i16>,
    stats: Arc<QueueStats>,
}

impl SampleConsumer {
    #[inline]
    pub fn pop(&mut self) -> Option<i16> {
        self.inner.try_pop()
    }

    /// Pop one sample, or silence when empty
    #[inline]
    pub fn pop_or_silence(&mut self) -> i16 {
        match self.inner.try_pop() {
            Some(sample) => sample,
            None => {
                self.stats.silenced.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Pop up to `out.len()` samples, returning how many were written
    pub fn pop_slice(&mut self, out: &mut [i16]) -> usize {
        self.inner.pop_slice(out)
    }

    /// Fill `out` completely, padding with silence once the queue runs dry
    pub fn fill_or_silence(&mut self, out: &mut [i16]) -> usize {
        let popped = self.inner.pop_slice(out);
        if popped < out.len() {
            out[popped..].fill(0);
            self.stats
                .silenced
                .fetch_add((out.len() - popped) as u64, Ordering::Relaxed);
        }
        popped
    }

    /// Discard everything queued
    pub fn clear(&mut self) -> usize {
        self.inner.clear()
    }

    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            len: self.len(),
            capacity: self.capacity(),
            dropped: self.stats.dropped(),
            silenced: self.stats.silenced(),
        }
    }
}
