//! Single-producer/single-consumer ring of pending spike keys
//!
//! One slot is always left empty so that `input == output` means empty and
//! `input + 1 == output` means full, without a separate length field that
//! both sides would have to write.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{constants::*, QueueError, Result, SpikeKey};

/// Snapshot of the queue's provenance counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    /// Pushes rejected because the queue was full
    pub overflow: u32,
    /// Pops attempted on an empty queue
    pub underflow: u32,
    /// Largest occupancy observed after a push
    pub high_water: usize,
}

/// Bounded lock-free SPSC queue of [`SpikeKey`]s
///
/// `push` must only ever be called from one context and `pop`/`peek_equal`
/// from one other context. [`spike_channel`] enforces this with handles.
#[derive(Debug)]
pub struct SpikeQueue {
    slots: Box<[AtomicU32]>,
    mask: usize,
    // written by the producer only
    input: AtomicUsize,
    // written by the consumer only
    output: AtomicUsize,
    overflow: AtomicU32,
    underflow: AtomicU32,
    high_water: AtomicUsize,
}

impl SpikeQueue {
    /// Create a queue with `capacity` slots (power of two, `capacity - 1` usable)
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < MIN_QUEUE_SIZE || !capacity.is_power_of_two() {
            return Err(QueueError::InvalidCapacity { capacity });
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| QueueError::AllocationFailed { capacity })?;
        slots.extend((0..capacity).map(|_| AtomicU32::new(0)));

        log::debug!("spike queue allocated: {} slots ({} usable)", capacity, capacity - 1);

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            input: AtomicUsize::new(0),
            output: AtomicUsize::new(0),
            overflow: AtomicU32::new(0),
            underflow: AtomicU32::new(0),
            high_water: AtomicUsize::new(0),
        })
    }

    /// Create a queue with the default spike queue size
    pub fn with_default_capacity() -> Result<Self> {
        Self::new(DEFAULT_SPIKE_QUEUE_SIZE)
    }

    /// Append a key (producer side)
    ///
    /// Returns `false` and bumps the overflow counter when the queue is full;
    /// the spike is dropped.
    #[inline]
    pub fn push(&self, key: SpikeKey) -> bool {
        let input = self.input.load(Ordering::Relaxed);
        let next = (input + 1) & self.mask;
        let output = self.output.load(Ordering::Acquire);

        if next == output {
            self.overflow.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.slots[input].store(key.raw(), Ordering::Relaxed);
        self.input.store(next, Ordering::Release);

        let occupied = next.wrapping_sub(output) & self.mask;
        self.high_water.fetch_max(occupied, Ordering::Relaxed);
        true
    }

    /// Remove the oldest key (consumer side)
    ///
    /// An empty queue yields `None` and bumps the underflow counter, which a
    /// correct consumer never does because it checks [`is_empty`](Self::is_empty) first.
    #[inline]
    pub fn pop(&self) -> Option<SpikeKey> {
        let output = self.output.load(Ordering::Relaxed);
        let input = self.input.load(Ordering::Acquire);

        if output == input {
            self.underflow.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let raw = self.slots[output].load(Ordering::Relaxed);
        self.output.store((output + 1) & self.mask, Ordering::Release);
        Some(SpikeKey(raw))
    }

    /// Remove the head only if it equals `key` (consumer side)
    ///
    /// Used to fold back-to-back spikes from one source into a single row fetch.
    #[inline]
    pub fn peek_equal(&self, key: SpikeKey) -> bool {
        let output = self.output.load(Ordering::Relaxed);
        let input = self.input.load(Ordering::Acquire);

        if output == input || self.slots[output].load(Ordering::Relaxed) != key.raw() {
            return false;
        }

        self.output.store((output + 1) & self.mask, Ordering::Release);
        true
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        let output = self.output.load(Ordering::Acquire);
        let input = self.input.load(Ordering::Acquire);
        output == input
    }

    /// Check if queue is full
    pub fn is_full(&self) -> bool {
        let input = self.input.load(Ordering::Acquire);
        let output = self.output.load(Ordering::Acquire);
        ((input + 1) & self.mask) == output
    }

    /// Number of queued keys (exact only when both sides are quiescent)
    pub fn len(&self) -> usize {
        let input = self.input.load(Ordering::Acquire);
        let output = self.output.load(Ordering::Acquire);
        input.wrapping_sub(output) & self.mask
    }

    /// Usable capacity (one slot is reserved for full detection)
    pub fn capacity(&self) -> usize {
        self.mask
    }

    /// Current counter values
    pub fn counters(&self) -> QueueCounters {
        QueueCounters {
            overflow: self.overflow.load(Ordering::Relaxed),
            underflow: self.underflow.load(Ordering::Relaxed),
            high_water: self.high_water.load(Ordering::Relaxed),
        }
    }
}

/// Producer half returned by [`spike_channel`]; the only handle that can push
#[derive(Debug)]
pub struct SpikeProducer {
    queue: Arc<SpikeQueue>,
}

impl SpikeProducer {
    /// Enqueue a received spike; `false` means it was dropped
    #[inline]
    pub fn push(&self, key: SpikeKey) -> bool {
        self.queue.push(key)
    }

    /// Number of queued keys
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current counter values
    pub fn counters(&self) -> QueueCounters {
        self.queue.counters()
    }
}

/// Consumer half returned by [`spike_channel`]; the only handle that can pop
#[derive(Debug)]
pub struct SpikeConsumer {
    queue: Arc<SpikeQueue>,
}

impl SpikeConsumer {
    /// Remove the oldest key
    #[inline]
    pub fn pop(&self) -> Option<SpikeKey> {
        self.queue.pop()
    }

    /// Remove the head only if it equals `key`
    #[inline]
    pub fn peek_equal(&self, key: SpikeKey) -> bool {
        self.queue.peek_equal(key)
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued keys
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Usable capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Current counter values
    pub fn counters(&self) -> QueueCounters {
        self.queue.counters()
    }
}

/// Build a queue and split it into its producer and consumer halves
pub fn spike_channel(capacity: usize) -> Result<(SpikeProducer, SpikeConsumer)> {
    let queue = Arc::new(SpikeQueue::new(capacity)?);
    Ok((
        SpikeProducer { queue: Arc::clone(&queue) },
        SpikeConsumer { queue },
    ))
}
