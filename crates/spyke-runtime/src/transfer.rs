//! Row storage and the engines that move rows into scratch buffers
//!
//! Two engines implement [`RowTransfer`]. [`BusyWaitTransfer`] copies
//! immediately and reports completion in the same call. [`AsyncTransfer`]
//! queues requests in FIFO order and completes them one engine cycle at a
//! time from [`RowTransfer::poll`], which models the completion interrupt.
//! Write-backs share the FIFO, so a read issued after a write-back observes
//! the written words.

use std::collections::VecDeque;

use crate::config::{TransferConfig, TransferMode};
use crate::error::*;
use crate::pipeline::DmaBuffer;

/// Bulk word-addressed memory holding synaptic rows
pub trait RowStore {
    /// Size in words
    fn len_words(&self) -> usize;

    /// Copy `dst.len()` words starting at `address` into `dst`
    fn read(&self, address: usize, dst: &mut [u32]) -> Result<()>;

    /// Copy `src` into storage starting at `address`
    fn write(&mut self, address: usize, src: &[u32]) -> Result<()>;
}

fn check_range(address: usize, len: usize, size: usize) -> Result<core::ops::Range<usize>> {
    match address.checked_add(len) {
        Some(end) if end <= size => Ok(address..end),
        _ => Err(CoreError::transfer(format!(
            "words {}..{} outside row storage of {} words",
            address,
            address.saturating_add(len),
            size
        ))),
    }
}

/// Row storage held in an owned word vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryRowStore {
    words: Vec<u32>,
}

impl MemoryRowStore {
    /// Wrap existing row words
    pub fn new(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Current contents
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Take back the words
    pub fn into_words(self) -> Vec<u32> {
        self.words
    }
}

impl RowStore for MemoryRowStore {
    fn len_words(&self) -> usize {
        self.words.len()
    }

    fn read(&self, address: usize, dst: &mut [u32]) -> Result<()> {
        let range = check_range(address, dst.len(), self.words.len())?;
        dst.copy_from_slice(&self.words[range]);
        Ok(())
    }

    fn write(&mut self, address: usize, src: &[u32]) -> Result<()> {
        let range = check_range(address, src.len(), self.words.len())?;
        self.words[range].copy_from_slice(src);
        Ok(())
    }
}

/// A row read into one scratch buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// First word of the row in storage
    pub address: usize,
    /// Words to copy
    pub n_words: usize,
    /// Destination scratch buffer
    pub buffer: usize,
}

/// Whether a request finished inside the issuing call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Data is in place
    Complete,
    /// Completion will be reported by a later `poll`
    Pending,
}

/// Moves rows between storage and scratch buffers
pub trait RowTransfer {
    /// Backing storage type
    type Store: RowStore;

    /// Start a read into `buffers[request.buffer]`
    fn read_row(
        &mut self,
        request: ReadRequest,
        buffers: &mut [DmaBuffer],
    ) -> Result<TransferStatus>;

    /// Start writing `words`, taken from scratch buffer `buffer`, back to storage at `address`
    fn write_back(
        &mut self,
        buffer: usize,
        address: usize,
        words: &[u32],
    ) -> Result<TransferStatus>;

    /// Set aside write-back space for `n_buffers` buffers of up to `max_words` words
    fn reserve_write_back(&mut self, _n_buffers: usize, _max_words: usize) -> Result<()> {
        Ok(())
    }

    /// Advance the engine one cycle, returning the buffer of a completed read
    fn poll(&mut self, buffers: &mut [DmaBuffer]) -> Result<Option<usize>>;

    /// Reads issued but not yet reported complete
    fn reads_in_flight(&self) -> usize;

    /// True while a read into `buffer` is queued
    fn is_reading(&self, buffer: usize) -> bool;

    /// True when no request of either kind is outstanding
    fn is_idle(&self) -> bool;

    /// Total engine cycles spent so far
    fn cycles(&self) -> u64;

    /// Longest single transfer so far, in cycles
    fn max_transfer_cycles(&self) -> u32;

    /// Backing storage
    fn store(&self) -> &Self::Store;
}

fn fill_buffer<S: RowStore>(
    store: &S,
    request: ReadRequest,
    buffers: &mut [DmaBuffer],
) -> Result<()> {
    let n_buffers = buffers.len();
    let buffer = buffers.get_mut(request.buffer).ok_or_else(|| {
        CoreError::transfer(format!(
            "scratch buffer {} does not exist ({} buffers)",
            request.buffer, n_buffers
        ))
    })?;
    let capacity = buffer.capacity();
    let dst = buffer.words_mut().get_mut(..request.n_words).ok_or_else(|| {
        CoreError::transfer(format!(
            "row of {} words exceeds scratch buffer of {}",
            request.n_words, capacity
        ))
    })?;
    store.read(request.address, dst)
}

/// Engine that blocks until every transfer is done
#[derive(Debug, Clone)]
pub struct BusyWaitTransfer<S> {
    store: S,
    timing: TransferConfig,
    cycles: u64,
    max_cycles: u32,
}

impl<S: RowStore> BusyWaitTransfer<S> {
    /// Create an engine over `store`
    pub fn new(store: S, timing: TransferConfig) -> Self {
        Self {
            store,
            timing,
            cycles: 0,
            max_cycles: 0,
        }
    }

    /// Give back the storage
    pub fn into_store(self) -> S {
        self.store
    }

    fn spend(&mut self, n_words: usize) {
        let cycles = self.timing.cycles_for(n_words);
        self.cycles += u64::from(cycles);
        self.max_cycles = self.max_cycles.max(cycles);
    }
}

impl<S: RowStore> RowTransfer for BusyWaitTransfer<S> {
    type Store = S;

    fn read_row(
        &mut self,
        request: ReadRequest,
        buffers: &mut [DmaBuffer],
    ) -> Result<TransferStatus> {
        fill_buffer(&self.store, request, buffers)?;
        self.spend(request.n_words);
        Ok(TransferStatus::Complete)
    }

    fn write_back(
        &mut self,
        _buffer: usize,
        address: usize,
        words: &[u32],
    ) -> Result<TransferStatus> {
        self.store.write(address, words)?;
        self.spend(words.len());
        Ok(TransferStatus::Complete)
    }

    fn poll(&mut self, _buffers: &mut [DmaBuffer]) -> Result<Option<usize>> {
        Ok(None)
    }

    fn reads_in_flight(&self) -> usize {
        0
    }

    fn is_reading(&self, _buffer: usize) -> bool {
        false
    }

    fn is_idle(&self) -> bool {
        true
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }

    fn max_transfer_cycles(&self) -> u32 {
        self.max_cycles
    }

    fn store(&self) -> &S {
        &self.store
    }
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Read(ReadRequest),
    Write { address: usize, slot: usize },
}

#[derive(Debug, Clone)]
struct Pending {
    job: Job,
    remaining: u32,
}

/// Queued engine completing one request at a time from `poll`
#[derive(Debug, Clone)]
pub struct AsyncTransfer<S> {
    store: S,
    timing: TransferConfig,
    queue: VecDeque<Pending>,
    write_slots: Vec<Vec<u32>>,
    reads: usize,
    cycles: u64,
    max_cycles: u32,
}

impl<S: RowStore> AsyncTransfer<S> {
    /// Create an engine over `store`
    pub fn new(store: S, timing: TransferConfig) -> Self {
        Self {
            store,
            timing,
            queue: VecDeque::with_capacity(4),
            write_slots: Vec::new(),
            reads: 0,
            cycles: 0,
            max_cycles: 0,
        }
    }

    /// Give back the storage
    pub fn into_store(self) -> S {
        self.store
    }

    /// Requests of either kind still queued
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn write_pending(&self, slot: usize) -> bool {
        self.queue
            .iter()
            .any(|p| matches!(p.job, Job::Write { slot: s, .. } if s == slot))
    }

    fn enqueue(&mut self, job: Job, n_words: usize) {
        let remaining = self.timing.cycles_for(n_words);
        self.max_cycles = self.max_cycles.max(remaining);
        self.queue.push_back(Pending { job, remaining });
    }
}

impl<S: RowStore> RowTransfer for AsyncTransfer<S> {
    type Store = S;

    fn read_row(
        &mut self,
        request: ReadRequest,
        buffers: &mut [DmaBuffer],
    ) -> Result<TransferStatus> {
        let capacity = buffers.get(request.buffer).map(DmaBuffer::capacity);
        match capacity {
            Some(cap) if request.n_words <= cap => {}
            _ => {
                return Err(CoreError::transfer(format!(
                    "read of {} words into buffer {} does not fit",
                    request.n_words, request.buffer
                )))
            }
        }
        check_range(request.address, request.n_words, self.store.len_words())?;
        self.enqueue(Job::Read(request), request.n_words);
        self.reads += 1;
        Ok(TransferStatus::Pending)
    }

    fn write_back(
        &mut self,
        buffer: usize,
        address: usize,
        words: &[u32],
    ) -> Result<TransferStatus> {
        check_range(address, words.len(), self.store.len_words())?;
        if self.write_pending(buffer) {
            return Err(CoreError::transfer(format!(
                "write-back from buffer {} while its previous write-back is queued",
                buffer
            )));
        }
        if buffer >= self.write_slots.len() {
            self.write_slots.resize_with(buffer + 1, Vec::new);
        }
        let slot = &mut self.write_slots[buffer];
        slot.clear();
        slot.extend_from_slice(words);
        self.enqueue(Job::Write { address, slot: buffer }, words.len());
        Ok(TransferStatus::Pending)
    }

    fn reserve_write_back(&mut self, n_buffers: usize, max_words: usize) -> Result<()> {
        let mut slots = Vec::with_capacity(n_buffers);
        for _ in 0..n_buffers {
            let mut slot = try_alloc("write-back slot", max_words, 0u32)?;
            slot.clear();
            slots.push(slot);
        }
        self.write_slots = slots;
        Ok(())
    }

    fn poll(&mut self, buffers: &mut [DmaBuffer]) -> Result<Option<usize>> {
        let Some(head) = self.queue.front_mut() else {
            return Ok(None);
        };
        self.cycles += 1;
        head.remaining = head.remaining.saturating_sub(1);
        if head.remaining > 0 {
            return Ok(None);
        }

        let Some(done) = self.queue.pop_front() else {
            return Ok(None);
        };
        match done.job {
            Job::Read(request) => {
                self.reads -= 1;
                fill_buffer(&self.store, request, buffers)?;
                log::trace!("row read complete: buffer {} <- @{}", request.buffer, request.address);
                Ok(Some(request.buffer))
            }
            Job::Write { address, slot } => {
                let words = self.write_slots.get(slot).map_or(&[][..], Vec::as_slice);
                self.store.write(address, words)?;
                Ok(None)
            }
        }
    }

    fn reads_in_flight(&self) -> usize {
        self.reads
    }

    fn is_reading(&self, buffer: usize) -> bool {
        self.queue
            .iter()
            .any(|p| matches!(p.job, Job::Read(r) if r.buffer == buffer))
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }

    fn max_transfer_cycles(&self) -> u32 {
        self.max_cycles
    }

    fn store(&self) -> &S {
        &self.store
    }
}

/// Engine chosen at run time from [`TransferConfig::mode`]
#[derive(Debug, Clone)]
pub enum AnyTransfer<S> {
    /// Blocking copies
    BusyWait(BusyWaitTransfer<S>),
    /// Queued copies completed by polling
    Async(AsyncTransfer<S>),
}

impl<S: RowStore> AnyTransfer<S> {
    /// Build the engine selected by `config`
    pub fn from_config(store: S, config: &TransferConfig) -> Self {
        match config.mode {
            TransferMode::BusyWait => Self::BusyWait(BusyWaitTransfer::new(store, config.clone())),
            TransferMode::Async => Self::Async(AsyncTransfer::new(store, config.clone())),
        }
    }

    /// Discipline of the wrapped engine
    pub fn mode(&self) -> TransferMode {
        match self {
            Self::BusyWait(_) => TransferMode::BusyWait,
            Self::Async(_) => TransferMode::Async,
        }
    }

    /// Give back the storage
    pub fn into_store(self) -> S {
        match self {
            Self::BusyWait(t) => t.into_store(),
            Self::Async(t) => t.into_store(),
        }
    }
}

impl<S: RowStore> RowTransfer for AnyTransfer<S> {
    type Store = S;

    fn read_row(
        &mut self,
        request: ReadRequest,
        buffers: &mut [DmaBuffer],
    ) -> Result<TransferStatus> {
        match self {
            Self::BusyWait(t) => t.read_row(request, buffers),
            Self::Async(t) => t.read_row(request, buffers),
        }
    }

    fn write_back(
        &mut self,
        buffer: usize,
        address: usize,
        words: &[u32],
    ) -> Result<TransferStatus> {
        match self {
            Self::BusyWait(t) => t.write_back(buffer, address, words),
            Self::Async(t) => t.write_back(buffer, address, words),
        }
    }

    fn reserve_write_back(&mut self, n_buffers: usize, max_words: usize) -> Result<()> {
        match self {
            Self::BusyWait(t) => t.reserve_write_back(n_buffers, max_words),
            Self::Async(t) => t.reserve_write_back(n_buffers, max_words),
        }
    }

    fn poll(&mut self, buffers: &mut [DmaBuffer]) -> Result<Option<usize>> {
        match self {
            Self::BusyWait(t) => t.poll(buffers),
            Self::Async(t) => t.poll(buffers),
        }
    }

    fn reads_in_flight(&self) -> usize {
        match self {
            Self::BusyWait(t) => t.reads_in_flight(),
            Self::Async(t) => t.reads_in_flight(),
        }
    }

    fn is_reading(&self, buffer: usize) -> bool {
        match self {
            Self::BusyWait(t) => t.is_reading(buffer),
            Self::Async(t) => t.is_reading(buffer),
        }
    }

    fn is_idle(&self) -> bool {
        match self {
            Self::BusyWait(t) => t.is_idle(),
            Self::Async(t) => t.is_idle(),
        }
    }

    fn cycles(&self) -> u64 {
        match self {
            Self::BusyWait(t) => t.cycles(),
            Self::Async(t) => t.cycles(),
        }
    }

    fn max_transfer_cycles(&self) -> u32 {
        match self {
            Self::BusyWait(t) => t.max_transfer_cycles(),
            Self::Async(t) => t.max_transfer_cycles(),
        }
    }

    fn store(&self) -> &S {
        match self {
            Self::BusyWait(t) => t.store(),
            Self::Async(t) => t.store(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers() -> Vec<DmaBuffer> {
        vec![DmaBuffer::new(8).unwrap(), DmaBuffer::new(8).unwrap()]
    }

    fn store() -> MemoryRowStore {
        MemoryRowStore::new((0..32).collect())
    }

    #[test]
    fn test_memory_store_bounds() {
        let mut s = store();
        let mut dst = [0u32; 4];
        s.read(28, &mut dst).unwrap();
        assert_eq!(dst, [28, 29, 30, 31]);
        assert!(s.read(29, &mut dst).is_err());
        assert!(s.read(usize::MAX, &mut dst).is_err());
        s.write(0, &[7, 7]).unwrap();
        assert_eq!(&s.words()[..3], &[7, 7, 2]);
        assert!(s.write(31, &[1, 2]).is_err());
    }

    #[test]
    fn test_busy_wait_completes_inline() {
        let mut t = BusyWaitTransfer::new(store(), TransferConfig::default());
        let mut bufs = buffers();
        let req = ReadRequest { address: 4, n_words: 3, buffer: 1 };
        assert_eq!(t.read_row(req, &mut bufs).unwrap(), TransferStatus::Complete);
        assert_eq!(&bufs[1].words()[..3], &[4, 5, 6]);
        assert!(t.is_idle());
        assert_eq!(t.cycles(), 3);
        assert!(t.poll(&mut bufs).unwrap().is_none());
    }

    #[test]
    fn test_async_completes_after_latency() {
        let timing = TransferConfig {
            mode: TransferMode::Async,
            setup_cycles: 2,
            words_per_cycle: 4,
        };
        let mut t = AsyncTransfer::new(store(), timing);
        let mut bufs = buffers();
        let req = ReadRequest { address: 8, n_words: 4, buffer: 0 };
        assert_eq!(t.read_row(req, &mut bufs).unwrap(), TransferStatus::Pending);
        assert_eq!(t.reads_in_flight(), 1);
        assert_eq!(bufs[0].words()[0], 0);

        assert_eq!(t.poll(&mut bufs).unwrap(), None);
        assert_eq!(t.poll(&mut bufs).unwrap(), None);
        assert_eq!(t.poll(&mut bufs).unwrap(), Some(0));
        assert_eq!(&bufs[0].words()[..4], &[8, 9, 10, 11]);
        assert!(t.is_idle());
        assert_eq!(t.cycles(), 3);
        assert_eq!(t.max_transfer_cycles(), 3);
        // idle polls cost nothing
        assert_eq!(t.poll(&mut bufs).unwrap(), None);
        assert_eq!(t.cycles(), 3);
    }

    #[test]
    fn test_async_read_observes_earlier_write_back() {
        let mut t = AsyncTransfer::new(store(), TransferConfig::default());
        let mut bufs = buffers();
        t.reserve_write_back(2, 8).unwrap();
        t.write_back(0, 10, &[100, 101]).unwrap();
        t.read_row(ReadRequest { address: 9, n_words: 4, buffer: 1 }, &mut bufs)
            .unwrap();
        assert_eq!(t.queued(), 2);
        assert!(t.is_reading(1));
        assert!(!t.is_reading(0));
        // one write-back per buffer may be queued
        assert!(t.write_back(0, 20, &[1]).is_err());

        let mut completed = None;
        for _ in 0..16 {
            if let Some(b) = t.poll(&mut bufs).unwrap() {
                completed = Some(b);
                break;
            }
        }
        assert_eq!(completed, Some(1));
        assert_eq!(&bufs[1].words()[..4], &[9, 100, 101, 12]);
        assert_eq!(&t.store().words()[10..12], &[100, 101]);
    }

    #[test]
    fn test_rejects_bad_requests() {
        let mut t = AnyTransfer::from_config(store(), &TransferConfig::default());
        assert_eq!(t.mode(), TransferMode::Async);
        let mut bufs = buffers();
        assert!(t
            .read_row(ReadRequest { address: 30, n_words: 4, buffer: 0 }, &mut bufs)
            .is_err());
        assert!(t
            .read_row(ReadRequest { address: 0, n_words: 9, buffer: 0 }, &mut bufs)
            .is_err());
        assert!(t
            .read_row(ReadRequest { address: 0, n_words: 1, buffer: 2 }, &mut bufs)
            .is_err());
        assert!(t.is_idle());
    }

    #[test]
    fn test_write_back_slots_are_reused() {
        let mut t = AsyncTransfer::new(store(), TransferConfig::default());
        t.reserve_write_back(2, 4).unwrap();
        let mut bufs = buffers();
        let slot_ptr = t.write_slots[1].as_ptr();
        for round in 0..3u32 {
            t.write_back(1, 0, &[round, round + 1, round + 2]).unwrap();
            assert_eq!(t.write_slots[1].as_ptr(), slot_ptr);
            while !t.is_idle() {
                t.poll(&mut bufs).unwrap();
            }
            assert_eq!(&t.store().words()[..3], &[round, round + 1, round + 2]);
        }
    }
}
