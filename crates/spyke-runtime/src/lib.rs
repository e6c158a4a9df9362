//! Spike-triggered synaptic processing for one neuromorphic core
//!
//! A spike key arrives, is looked up in the routing table, its synaptic row
//! is fetched from row storage into a scratch buffer, and every synapse in
//! the row adds its weight into a delay ring buffer slot. Once per timestep
//! the timer tick drains the slot for the new time and hands it to the
//! neuron stage as fixed-point input.
//!
//! ```text
//! SpikeProducer -> SpikeQueue -> RoutingTable -> RowFetchPipeline -> RingBuffer
//!                                                      |                 |
//!                                               PlasticityHandler   NeuronUpdate
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export essential types from the layers below
pub use spyke_lockfree::{spike_channel, QueueError, SpikeConsumer, SpikeKey, SpikeProducer};
pub use spyke_storage::{
    CoreImage, FixedRegion, FixedSynapse, ImageMeta, RoutingEntry, RowBuilder, RowDescriptor,
    StorageError, SynapseFormat, SynapticRow,
};

pub mod config;
pub mod error;
pub mod fixed;
pub mod neuron;
pub mod pipeline;
pub mod plasticity;
pub mod provenance;
pub mod ring_buffer;
pub mod routing;
pub mod structural;
pub mod synaptic_core;
pub mod transfer;

pub use config::{CoreConfig, TransferConfig, TransferMode};
pub use error::{CoreError, Result};
pub use fixed::Accum;
pub use neuron::{EchoThreshold, NeuronUpdate, Passive};
pub use pipeline::{BufferState, DmaBuffer, PipelineState, RowFetchPipeline, RowMeta};
pub use plasticity::{FrozenWeights, PlasticityHandler, PlasticityKind, StaticSynapses, WeightDecay};
pub use provenance::Provenance;
pub use ring_buffer::{InputConverter, RingBuffer, SynapticInputs};
pub use routing::{LookupOutcome, RoutingTable, RowLocation, Target};
pub use structural::{NoRewiring, StructuralPlasticity};
pub use synaptic_core::{Collaborators, SpikeEvent, SpikeSchedule, SynapticCore, TimestepReport};
pub use transfer::{
    AnyTransfer, AsyncTransfer, BusyWaitTransfer, MemoryRowStore, RowStore, RowTransfer,
    TransferStatus,
};

/// Runtime crate version for compatibility checking
pub const RUNTIME_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_integration() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        let format = config.format().unwrap();
        let ring = RingBuffer::new(format).unwrap();
        assert_eq!(ring.len(), 1 << format.ring_bits());
    }
}
