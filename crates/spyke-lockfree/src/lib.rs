//! Lock-free spike ingestion for event-driven synaptic processing
//!
//! The spike-arrival interrupt is the only producer and the deferred drain
//! task is the only consumer. [`SpikeQueue`] is a bounded power-of-two ring
//! whose `input` index is written solely by the producer and whose `output`
//! index is written solely by the consumer, so no lock is ever taken.
//! [`spike_channel`] hands out one handle per side to make that split a
//! property of the types rather than a convention.

#![deny(missing_docs)]
#![warn(clippy::all)]

use core::fmt;

pub mod error;
pub mod queue;

pub use error::{QueueError, Result};
pub use queue::{spike_channel, QueueCounters, SpikeConsumer, SpikeProducer, SpikeQueue};

/// Opaque 32-bit identifier of a firing source neuron
///
/// The bit layout (population, core, local index) belongs to whoever assigns
/// keys; this crate only compares them, exactly or under a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct SpikeKey(pub u32);

impl SpikeKey {
    /// Create a key from its raw value
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw 32-bit value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True when `self & mask == key`
    pub const fn matches(self, key: u32, mask: u32) -> bool {
        self.0 & mask == key
    }
}

impl From<u32> for SpikeKey {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SpikeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Queue sizing constants
pub mod constants {
    /// Default ingestion queue capacity (255 usable slots)
    pub const DEFAULT_SPIKE_QUEUE_SIZE: usize = 256;
    /// Smallest capacity that leaves one usable slot
    pub const MIN_QUEUE_SIZE: usize = 2;
}
