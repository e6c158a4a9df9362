//! Monotonic counters describing how a run went

use spyke_lockfree::QueueCounters;

use crate::pipeline::PipelineCounters;
use crate::ring_buffer::RingBuffer;

/// Counter snapshot of one core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Provenance {
    /// Spikes dropped because the ingestion queue was full
    pub queue_overflows: u64,
    /// Pops on an empty ingestion queue
    pub queue_underflows: u64,
    /// Highest ingestion queue occupancy
    pub queue_high_water: u64,
    /// Spikes taken from the queue
    pub spikes_processed: u64,
    /// Spikes served by a row fetched for another spike
    pub spikes_coalesced: u64,
    /// Keys with no routing entry
    pub routing_misses: u64,
    /// Keys routed to an entry without synapses
    pub empty_routes: u64,
    /// Direct rows applied
    pub direct_rows: u64,
    /// Rows read from storage
    pub rows_fetched: u64,
    /// Rows skipped
    pub rows_rejected: u64,
    /// Fixed synapse contributions
    pub fixed_synapses: u64,
    /// Rows passed to the plasticity collaborator
    pub plastic_rows: u64,
    /// Plastic rows that failed
    pub plastic_failures: u64,
    /// Plastic regions written back
    pub write_backs: u64,
    /// Ring-buffer adds that clamped
    pub saturations: u64,
    /// Clamping adds per synapse type
    pub type_saturations: Vec<u64>,
    /// Drain requests folded into a running fetch chain
    pub drain_coalesced: u64,
    /// Timer ticks completed
    pub timesteps: u64,
    /// Engine cycles spent on transfers
    pub transfer_cycles: u64,
    /// Longest single transfer in cycles
    pub max_transfer_cycles: u32,
}

impl Provenance {
    pub(crate) fn collect(
        queue: QueueCounters,
        pipeline: PipelineCounters,
        ring: &RingBuffer,
        timesteps: u64,
        transfer_cycles: u64,
        max_transfer_cycles: u32,
    ) -> Self {
        Self {
            queue_overflows: u64::from(queue.overflow),
            queue_underflows: u64::from(queue.underflow),
            queue_high_water: queue.high_water as u64,
            spikes_processed: pipeline.spikes_processed,
            spikes_coalesced: pipeline.spikes_coalesced,
            routing_misses: pipeline.routing_misses,
            empty_routes: pipeline.empty_routes,
            direct_rows: pipeline.direct_rows,
            rows_fetched: pipeline.rows_fetched,
            rows_rejected: pipeline.rows_rejected,
            fixed_synapses: pipeline.fixed_synapses,
            plastic_rows: pipeline.plastic_rows,
            plastic_failures: pipeline.plastic_failures,
            write_backs: pipeline.write_backs,
            saturations: ring.saturations(),
            type_saturations: ring.type_saturations().to_vec(),
            drain_coalesced: pipeline.drain_coalesced,
            timesteps,
            transfer_cycles,
            max_transfer_cycles,
        }
    }

    /// True if any spike or contribution was lost or distorted
    pub fn has_losses(&self) -> bool {
        self.queue_overflows > 0
            || self.rows_rejected > 0
            || self.plastic_failures > 0
            || self.saturations > 0
    }

    /// Log the counters at `info`, with losses repeated at `warn`
    pub fn log_summary(&self) {
        log::info!(
            "provenance: {} timesteps, {} spikes ({} coalesced), {} rows fetched, {} direct, {} fixed synapses",
            self.timesteps,
            self.spikes_processed,
            self.spikes_coalesced,
            self.rows_fetched,
            self.direct_rows,
            self.fixed_synapses
        );
        log::info!(
            "provenance: {} routing misses, {} empty routes, {} plastic rows, {} write-backs, {} transfer cycles (max {})",
            self.routing_misses,
            self.empty_routes,
            self.plastic_rows,
            self.write_backs,
            self.transfer_cycles,
            self.max_transfer_cycles
        );
        if self.has_losses() {
            log::warn!(
                "provenance: {} queue overflows (high water {}), {} rows rejected, {} plastic failures, {} saturations {:?}",
                self.queue_overflows,
                self.queue_high_water,
                self.rows_rejected,
                self.plastic_failures,
                self.saturations,
                self.type_saturations
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_losses() {
        let mut p = Provenance::default();
        assert!(!p.has_losses());
        p.routing_misses = 3;
        assert!(!p.has_losses());
        p.saturations = 1;
        assert!(p.has_losses());
    }
}
