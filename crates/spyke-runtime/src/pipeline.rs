//! Spike-to-row fetch pipeline
//!
//! Spikes are popped from the ingestion queue, routed and turned into row
//! reads into one of two scratch buffers. A completed row is decoded into
//! the ring buffer and handed to the plasticity collaborator. With an
//! asynchronous engine the next read is issued while the previous row is
//! still outstanding, so at most two reads are in flight.
//!
//! A read is only issued into a [`BufferState::Free`] buffer. A spike whose
//! row is already being filled joins that buffer instead of fetching the row
//! a second time, so every read of a row is issued after the previous copy
//! of it was processed and written back.
//!
//! A failed read, decode or write-back returns its buffer to
//! [`BufferState::Free`] before the error is reported.

use spyke_lockfree::{SpikeConsumer, SpikeKey};
use spyke_storage::split_row_mut;

use crate::error::*;
use crate::plasticity::PlasticityHandler;
use crate::ring_buffer::RingBuffer;
use crate::routing::{LookupOutcome, RoutingTable, Target};
use crate::transfer::{ReadRequest, RowStore, RowTransfer, TransferStatus};

/// Scratch buffers per pipeline
pub const N_BUFFERS: usize = 2;

/// Lifecycle of one scratch buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    /// Available for a new read
    #[default]
    Free,
    /// A read into this buffer is outstanding
    Filling,
    /// Holds a complete row awaiting processing
    Ready,
}

/// What a scratch buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowMeta {
    /// Row address in storage
    pub address: u64,
    /// First spike that requested the row
    pub key: SpikeKey,
    /// Words fetched
    pub n_words: u32,
    /// Source neuron index within its routing entry
    pub local_index: u32,
    /// Spikes to apply the row for
    pub spike_count: u32,
}

/// One scratch buffer of the fetch pipeline
#[derive(Debug, Clone)]
pub struct DmaBuffer {
    words: Vec<u32>,
    meta: RowMeta,
    state: BufferState,
}

impl DmaBuffer {
    /// Allocate a buffer holding up to `capacity` words
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            words: try_alloc("row scratch buffer", capacity, 0u32)?,
            meta: RowMeta::default(),
            state: BufferState::Free,
        })
    }

    /// Largest row the buffer accepts
    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    /// Buffer contents
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Mutable buffer contents, written by the transfer engine
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Current row metadata
    pub fn meta(&self) -> &RowMeta {
        &self.meta
    }

    /// Current state
    pub fn state(&self) -> BufferState {
        self.state
    }
}

/// Coarse pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No read outstanding and no row waiting
    Idle,
    /// At least one read outstanding
    FetchInProgress,
    /// A row is in a buffer and has not been processed
    RowReady,
}

/// Pipeline counters, folded into [`Provenance`](crate::Provenance) by the core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    /// Spikes taken from the ingestion queue
    pub spikes_processed: u64,
    /// Spikes folded into a row fetched for an earlier spike
    pub spikes_coalesced: u64,
    /// Keys with no routing entry
    pub routing_misses: u64,
    /// Keys whose entry has no synapses
    pub empty_routes: u64,
    /// Direct rows applied
    pub direct_rows: u64,
    /// Generic rows read from storage
    pub rows_fetched: u64,
    /// Rows skipped as too long, out of range or malformed
    pub rows_rejected: u64,
    /// Fixed synapse contributions made (one per synapse per spike)
    pub fixed_synapses: u64,
    /// Rows with a plastic region handed to the plasticity collaborator
    pub plastic_rows: u64,
    /// Plastic rows the collaborator reported as failed
    pub plastic_failures: u64,
    /// Plastic regions written back to storage
    pub write_backs: u64,
    /// Drain requests that arrived while a fetch chain was active
    pub drain_coalesced: u64,
}

/// Everything spike processing borrows from the core for one call
pub struct SpikeContext<'a> {
    /// Consumer side of the ingestion queue
    pub consumer: &'a SpikeConsumer,
    /// Routing table
    pub routing: &'a RoutingTable,
    /// Single-synapse words for direct routes
    pub direct_words: &'a [u32],
    /// Delay ring buffer
    pub ring: &'a mut RingBuffer,
    /// Plasticity collaborator
    pub plasticity: &'a mut dyn PlasticityHandler,
    /// Timestep being ingested
    pub time: u32,
}

/// Double-buffered row fetch pipeline over a transfer engine
#[derive(Debug)]
pub struct RowFetchPipeline<T> {
    transfer: T,
    buffers: [DmaBuffer; N_BUFFERS],
    counters: PipelineCounters,
}

impl<T: RowTransfer> RowFetchPipeline<T> {
    /// Create a pipeline with two buffers of `max_row_words` words
    pub fn new(mut transfer: T, max_row_words: usize) -> Result<Self> {
        let buffers = [DmaBuffer::new(max_row_words)?, DmaBuffer::new(max_row_words)?];
        transfer.reserve_write_back(N_BUFFERS, max_row_words)?;
        Ok(Self {
            transfer,
            buffers,
            counters: PipelineCounters::default(),
        })
    }

    /// Transfer engine
    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// Take back the transfer engine
    pub fn into_transfer(self) -> T {
        self.transfer
    }

    /// Scratch buffers
    pub fn buffers(&self) -> &[DmaBuffer] {
        &self.buffers
    }

    /// Counter snapshot
    pub fn counters(&self) -> PipelineCounters {
        self.counters
    }

    /// Coarse state derived from the buffers
    pub fn state(&self) -> PipelineState {
        if self.buffers.iter().any(|b| b.state == BufferState::Ready) {
            PipelineState::RowReady
        } else if self.buffers.iter().any(|b| b.state == BufferState::Filling) {
            PipelineState::FetchInProgress
        } else {
            PipelineState::Idle
        }
    }

    /// True while a fetch chain is active
    pub fn is_busy(&self) -> bool {
        self.state() != PipelineState::Idle
    }

    /// True when no read, write-back or waiting row remains
    pub fn is_quiescent(&self) -> bool {
        !self.is_busy() && self.transfer.is_idle()
    }

    /// Deferred drain task
    ///
    /// If a fetch chain is already running the request is only counted;
    /// the completion path keeps draining the queue.
    pub fn drain(&mut self, ctx: &mut SpikeContext<'_>) -> Result<()> {
        if self.is_busy() {
            self.counters.drain_coalesced += 1;
            return Ok(());
        }
        self.pump(ctx)
    }

    /// Completion path: advance the engine one cycle and process a finished row
    ///
    /// Returns true when a row completed.
    pub fn poll(&mut self, ctx: &mut SpikeContext<'_>) -> Result<bool> {
        let completed = match self.transfer.poll(&mut self.buffers) {
            Ok(completed) => completed,
            Err(err) => {
                self.release_orphaned();
                return Err(err);
            }
        };
        let Some(index) = completed else {
            return Ok(false);
        };
        self.finish(index, ctx)?;
        self.pump(ctx)?;
        Ok(true)
    }

    /// Pop and route spikes until the queue is empty or no buffer is free
    pub fn pump(&mut self, ctx: &mut SpikeContext<'_>) -> Result<()> {
        loop {
            let Some(free) = self.buffers.iter().position(|b| b.state == BufferState::Free) else {
                return Ok(());
            };
            if ctx.consumer.is_empty() {
                return Ok(());
            }
            let Some(key) = ctx.consumer.pop() else {
                return Ok(());
            };
            let mut count = 1u32;
            while ctx.consumer.peek_equal(key) {
                count += 1;
            }
            self.counters.spikes_processed += u64::from(count);
            self.counters.spikes_coalesced += u64::from(count - 1);
            log::trace!("spike {} x{} at t={}", key, count, ctx.time);

            let location = match ctx.routing.lookup_counted(key) {
                LookupOutcome::Hit(location) => location,
                LookupOutcome::Miss => {
                    self.counters.routing_misses += u64::from(count);
                    continue;
                }
                LookupOutcome::EmptyRoute => {
                    self.counters.empty_routes += u64::from(count);
                    continue;
                }
            };

            match location.target {
                Target::Direct { word_index } => {
                    self.apply_direct(word_index, count, ctx);
                }
                Target::Row { address, n_words } => {
                    if let Some(joined) = self.join_filling(address, count) {
                        log::trace!("spike {} joined row fetch in buffer {}", key, joined);
                        continue;
                    }
                    let n = n_words as usize;
                    let in_range = usize::try_from(address)
                        .ok()
                        .and_then(|a| a.checked_add(n))
                        .is_some_and(|end| end <= self.transfer.store().len_words());
                    if n > self.buffers[free].capacity() || !in_range {
                        self.counters.rows_rejected += 1;
                        log::warn!(
                            "rejected row for key {}: {} words at @{} (buffer {} words, storage {} words)",
                            key,
                            n,
                            address,
                            self.buffers[free].capacity(),
                            self.transfer.store().len_words()
                        );
                        continue;
                    }

                    let buffer = &mut self.buffers[free];
                    buffer.meta = RowMeta {
                        address,
                        key,
                        n_words,
                        local_index: location.local_index,
                        spike_count: count,
                    };
                    buffer.state = BufferState::Filling;
                    self.counters.rows_fetched += 1;

                    let request = ReadRequest {
                        address: address as usize,
                        n_words: n,
                        buffer: free,
                    };
                    match self.transfer.read_row(request, &mut self.buffers) {
                        Ok(TransferStatus::Complete) => self.finish(free, ctx)?,
                        Ok(TransferStatus::Pending) => {}
                        Err(err) => {
                            self.buffers[free].state = BufferState::Free;
                            log::warn!("row read for key {} failed: {}", key, err);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Process a filled buffer and free it, whatever the outcome
    fn finish(&mut self, index: usize, ctx: &mut SpikeContext<'_>) -> Result<()> {
        self.buffers[index].state = BufferState::Ready;
        let processed = self.process_buffer(index, ctx);
        self.buffers[index].state = BufferState::Free;
        processed
    }

    /// Free every filling buffer the engine no longer has a read queued for
    fn release_orphaned(&mut self) {
        for (index, buffer) in self.buffers.iter_mut().enumerate() {
            if buffer.state == BufferState::Filling && !self.transfer.is_reading(index) {
                log::warn!("read into buffer {} was lost", index);
                buffer.state = BufferState::Free;
            }
        }
    }

    fn join_filling(&mut self, address: u64, count: u32) -> Option<usize> {
        let index = self
            .buffers
            .iter()
            .position(|b| b.state == BufferState::Filling && b.meta.address == address)?;
        let meta = &mut self.buffers[index].meta;
        meta.spike_count = meta.spike_count.saturating_add(count);
        self.counters.spikes_coalesced += u64::from(count);
        Some(index)
    }

    fn apply_direct(&mut self, word_index: usize, count: u32, ctx: &mut SpikeContext<'_>) {
        let Some(&word) = ctx.direct_words.get(word_index) else {
            self.counters.rows_rejected += 1;
            log::warn!(
                "direct row {} outside {} direct words",
                word_index,
                ctx.direct_words.len()
            );
            return;
        };
        for _ in 0..count {
            ctx.ring.accumulate_word(ctx.time, word);
        }
        self.counters.direct_rows += 1;
        self.counters.fixed_synapses += u64::from(count);
    }

    fn process_buffer(&mut self, index: usize, ctx: &mut SpikeContext<'_>) -> Result<()> {
        let buffer = &mut self.buffers[index];
        let meta = buffer.meta;
        let words = &mut buffer.words[..meta.n_words as usize];

        let (plastic, fixed) = match split_row_mut(words) {
            Ok(parts) => parts,
            Err(err) => {
                self.counters.rows_rejected += 1;
                log::warn!("malformed row @{} for key {}: {}", meta.address, meta.key, err);
                return Ok(());
            }
        };

        for _ in 0..meta.spike_count {
            for &word in fixed.fixed_words() {
                ctx.ring.accumulate_word(ctx.time, word);
            }
        }
        self.counters.fixed_synapses +=
            fixed.fixed_synapse_count() as u64 * u64::from(meta.spike_count);

        if plastic.is_empty() && fixed.plastic_control_count() == 0 {
            return Ok(());
        }

        self.counters.plastic_rows += 1;
        let mut ok = true;
        for _ in 0..meta.spike_count {
            ok &= ctx
                .plasticity
                .process_plastic_row(ctx.time, plastic, fixed, ctx.ring);
        }
        if !ok {
            self.counters.plastic_failures += 1;
            return Ok(());
        }

        if ctx.plasticity.mutates_rows() && !plastic.is_empty() {
            let address = meta.address as usize + 1;
            self.transfer.write_back(index, address, plastic)?;
            self.counters.write_backs += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TransferConfig, TransferMode};
    use crate::plasticity::{StaticSynapses, WeightDecay};
    use crate::transfer::{AnyTransfer, MemoryRowStore};
    use spyke_lockfree::spike_channel;
    use spyke_storage::{FixedSynapse, RoutingEntry, RowBuilder, RowDescriptor, SynapseFormat};

    const STRIDE: u32 = 8;

    fn format() -> SynapseFormat {
        SynapseFormat::new(4, 1, 4).unwrap()
    }

    fn rows() -> Vec<u32> {
        let f = format();
        let mut rows = Vec::new();
        for pre in 0..4u16 {
            rows.extend(
                RowBuilder::new()
                    .fixed_synapse(FixedSynapse::new(10, 1, 0, pre), &f)
                    .build_padded(STRIDE as usize)
                    .unwrap(),
            );
        }
        rows
    }

    fn routing() -> RoutingTable {
        RoutingTable::new(vec![
            RoutingEntry::new(0x100, 0xFFFF_FFFC, RowDescriptor::row(0, STRIDE).unwrap()),
            RoutingEntry::new(0x200, 0xFFFF_FFFC, RowDescriptor::direct(0).unwrap()),
            RoutingEntry::new(0x300, 0xFFFF_FFFC, RowDescriptor::EMPTY),
        ])
        .unwrap()
    }

    fn engine<S: RowStore>(store: S, mode: TransferMode) -> AnyTransfer<S> {
        AnyTransfer::from_config(
            store,
            &TransferConfig {
                mode,
                ..TransferConfig::default()
            },
        )
    }

    fn fixture(
        mode: TransferMode,
    ) -> (RowFetchPipeline<AnyTransfer<MemoryRowStore>>, RoutingTable) {
        let transfer = engine(MemoryRowStore::new(rows()), mode);
        (RowFetchPipeline::new(transfer, 16).unwrap(), routing())
    }

    fn run(
        pipeline: &mut RowFetchPipeline<AnyTransfer<MemoryRowStore>>,
        routing: &RoutingTable,
        keys: &[u32],
    ) -> RingBuffer {
        let f = format();
        let direct = [spyke_storage::encode_fixed_synapse(&FixedSynapse::new(7, 2, 1, 3), &f)];
        let (producer, consumer) = spike_channel(16).unwrap();
        for &k in keys {
            assert!(producer.push(SpikeKey(k)));
        }
        let mut ring = RingBuffer::new(f).unwrap();
        let mut plasticity = StaticSynapses;
        let mut ctx = SpikeContext {
            consumer: &consumer,
            routing,
            direct_words: &direct,
            ring: &mut ring,
            plasticity: &mut plasticity,
            time: 0,
        };
        pipeline.drain(&mut ctx).unwrap();
        for _ in 0..1000 {
            if pipeline.is_quiescent() && consumer.is_empty() {
                break;
            }
            pipeline.poll(&mut ctx).unwrap();
        }
        assert!(pipeline.is_quiescent());
        assert_eq!(consumer.counters().underflow, 0);
        ring
    }

    #[test]
    fn test_busy_wait_processes_inline() {
        let (mut p, routing) = fixture(TransferMode::BusyWait);
        let ring = run(&mut p, &routing, &[0x100, 0x101, 0x200, 0x302, 0x400]);
        let c = p.counters();
        assert_eq!(c.spikes_processed, 5);
        assert_eq!(c.rows_fetched, 2);
        assert_eq!(c.direct_rows, 1);
        assert_eq!(c.empty_routes, 1);
        assert_eq!(c.routing_misses, 1);
        assert_eq!(ring.peek(1, 0, 0, 0), 10);
        assert_eq!(ring.peek(1, 0, 0, 1), 10);
        assert_eq!(ring.peek(2, 0, 1, 3), 7);
    }

    #[test]
    fn test_async_matches_busy_wait() {
        let keys = [0x100, 0x102, 0x103, 0x100, 0x200, 0x101];
        let (mut a, routing) = fixture(TransferMode::Async);
        let (mut b, _) = fixture(TransferMode::BusyWait);
        let ra = run(&mut a, &routing, &keys);
        let rb = run(&mut b, &routing, &keys);
        for neuron in 0..4 {
            assert_eq!(ra.peek(1, 0, 0, neuron), rb.peek(1, 0, 0, neuron));
        }
        assert_eq!(ra.pending_total(), rb.pending_total());
        assert_eq!(ra.peek(1, 0, 0, 0), 20);
        assert!(a.transfer().cycles() > 0);
    }

    #[test]
    fn test_repeated_key_fetches_once() {
        let (mut p, routing) = fixture(TransferMode::Async);
        let ring = run(&mut p, &routing, &[0x102, 0x102, 0x102]);
        let c = p.counters();
        assert_eq!(c.rows_fetched, 1);
        assert_eq!(c.spikes_coalesced, 2);
        assert_eq!(c.fixed_synapses, 3);
        assert_eq!(ring.peek(1, 0, 0, 2), 30);
    }

    #[test]
    fn test_drain_while_busy_is_coalesced() {
        let (mut p, routing) = fixture(TransferMode::Async);
        let f = format();
        let (producer, consumer) = spike_channel(8).unwrap();
        producer.push(SpikeKey(0x100));
        let mut ring = RingBuffer::new(f).unwrap();
        let mut plasticity = StaticSynapses;
        let mut ctx = SpikeContext {
            consumer: &consumer,
            routing: &routing,
            direct_words: &[],
            ring: &mut ring,
            plasticity: &mut plasticity,
            time: 0,
        };
        p.drain(&mut ctx).unwrap();
        assert_eq!(p.state(), PipelineState::FetchInProgress);
        producer.push(SpikeKey(0x101));
        p.drain(&mut ctx).unwrap();
        assert_eq!(p.counters().drain_coalesced, 1);
        // the queued spike is picked up by the completion path
        while !p.is_quiescent() || !consumer.is_empty() {
            p.poll(&mut ctx).unwrap();
        }
        assert_eq!(p.counters().rows_fetched, 2);
        assert_eq!(p.state(), PipelineState::Idle);
    }

    #[test]
    fn test_oversized_row_rejected() {
        let (transfer, routing) = {
            let (p, routing) = fixture(TransferMode::BusyWait);
            (p.into_transfer(), routing)
        };
        let mut p = RowFetchPipeline::new(transfer, 4).unwrap();
        // an 8-word row into 4-word buffers, then a direct word that does not exist
        let ring = run(&mut p, &routing, &[0x100, 0x202]);
        let c = p.counters();
        assert_eq!(c.spikes_processed, 2);
        assert_eq!(c.rows_rejected, 2);
        assert_eq!(c.rows_fetched, 0);
        assert_eq!(c.direct_rows, 0);
        assert_eq!(ring.pending_total(), 0);
    }

    /// Row storage whose reads at one address and all writes fail
    struct FaultyStore {
        inner: MemoryRowStore,
        bad_read: usize,
        writes_fail: bool,
    }

    impl RowStore for FaultyStore {
        fn len_words(&self) -> usize {
            self.inner.len_words()
        }

        fn read(&self, address: usize, dst: &mut [u32]) -> Result<()> {
            if address == self.bad_read {
                return Err(CoreError::transfer("bus error"));
            }
            self.inner.read(address, dst)
        }

        fn write(&mut self, address: usize, src: &[u32]) -> Result<()> {
            if self.writes_fail {
                return Err(CoreError::transfer("write protected"));
            }
            self.inner.write(address, src)
        }
    }

    fn all_free<T: RowTransfer>(p: &RowFetchPipeline<T>) -> bool {
        p.buffers().iter().all(|b| b.state() == BufferState::Free)
    }

    #[test]
    fn test_failed_read_frees_its_buffer() {
        let routing = routing();
        for mode in [TransferMode::BusyWait, TransferMode::Async] {
            let store = FaultyStore {
                inner: MemoryRowStore::new(rows()),
                bad_read: STRIDE as usize,
                writes_fail: false,
            };
            let mut p = RowFetchPipeline::new(engine(store, mode), 16).unwrap();
            let (producer, consumer) = spike_channel(8).unwrap();
            let mut ring = RingBuffer::new(format()).unwrap();
            let mut plasticity = StaticSynapses;
            let mut ctx = SpikeContext {
                consumer: &consumer,
                routing: &routing,
                direct_words: &[],
                ring: &mut ring,
                plasticity: &mut plasticity,
                time: 0,
            };

            producer.push(SpikeKey(0x101));
            let mut failed = p.drain(&mut ctx).is_err();
            for _ in 0..100 {
                if failed || p.is_quiescent() {
                    break;
                }
                failed = p.poll(&mut ctx).is_err();
            }
            assert!(failed, "{:?}", mode);
            assert!(all_free(&p), "{:?}", mode);
            assert_eq!(p.state(), PipelineState::Idle);

            // the pipeline keeps serving other rows
            producer.push(SpikeKey(0x102));
            p.drain(&mut ctx).unwrap();
            while !p.is_quiescent() {
                p.poll(&mut ctx).unwrap();
            }
            assert!(all_free(&p));
            assert_eq!(ctx.ring.peek(0, 1, 0, 2), 10);
        }
    }

    #[test]
    fn test_failed_write_back_frees_its_buffer() {
        let f = format();
        let row = RowBuilder::new()
            .plastic_words(&[64])
            .plastic_control(FixedSynapse::new(0, 1, 0, 1), &f)
            .build_padded(STRIDE as usize)
            .unwrap();
        let routing = RoutingTable::new(vec![RoutingEntry::new(
            0x100,
            0xFFFF_FFFF,
            RowDescriptor::row(0, STRIDE).unwrap(),
        )])
        .unwrap();
        for mode in [TransferMode::BusyWait, TransferMode::Async] {
            let store = FaultyStore {
                inner: MemoryRowStore::new(row.clone()),
                bad_read: usize::MAX,
                writes_fail: true,
            };
            let mut p = RowFetchPipeline::new(engine(store, mode), 16).unwrap();
            let (producer, consumer) = spike_channel(8).unwrap();
            let mut ring = RingBuffer::new(f).unwrap();
            let mut plasticity = WeightDecay::default();
            let mut ctx = SpikeContext {
                consumer: &consumer,
                routing: &routing,
                direct_words: &[],
                ring: &mut ring,
                plasticity: &mut plasticity,
                time: 0,
            };

            producer.push(SpikeKey(0x100));
            let mut failed = p.drain(&mut ctx).is_err();
            for _ in 0..100 {
                if failed || p.is_quiescent() {
                    break;
                }
                failed = p.poll(&mut ctx).is_err();
            }
            assert!(failed, "{:?}", mode);
            assert!(all_free(&p), "{:?}", mode);
            assert!(p.transfer().is_idle());
        }
    }
}
