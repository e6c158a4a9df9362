//! Spike key to synaptic row lookup
//!
//! Entries are sorted by key with prefix masks and no overlap, so a masked
//! binary search finds the only entry that can match. The table is read on
//! every spike and mutated only between timesteps through `&mut self`.

use spyke_lockfree::SpikeKey;
use spyke_storage::routing::validate_entries;
use spyke_storage::{RoutingEntry, RowDescriptor};

use crate::error::*;

/// Where the row for one source neuron lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Single synapse word inside the direct-row array
    Direct {
        /// Index into the direct words
        word_index: usize,
    },
    /// Generic row in bulk storage
    Row {
        /// First word of the row slot
        address: u64,
        /// Slot width (the routing stride)
        n_words: u32,
    },
}

/// Result of a successful lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    /// Index of the matching entry
    pub entry: usize,
    /// Key being looked up
    pub key: SpikeKey,
    /// Source neuron index within the entry (`key & !mask`)
    pub local_index: u32,
    /// Row location
    pub target: Target,
}

/// Lookup result that distinguishes the two ways of finding nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// A row to process
    Hit(RowLocation),
    /// No entry matches the key
    Miss,
    /// An entry matches but carries no synapses
    EmptyRoute,
}

impl LookupOutcome {
    /// The location, if any
    pub fn location(self) -> Option<RowLocation> {
        match self {
            Self::Hit(location) => Some(location),
            _ => None,
        }
    }
}

/// Sorted routing table for one core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    entries: Vec<RoutingEntry>,
}

impl RoutingTable {
    /// Build a table, checking sort order, masks and overlap
    pub fn new(entries: Vec<RoutingEntry>) -> Result<Self> {
        validate_entries(&entries)?;
        log::debug!("routing table loaded: {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Entries in key order
    pub fn entries(&self) -> &[RoutingEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Masked binary search for the entry matching `key`
    #[inline]
    pub fn find(&self, key: SpikeKey) -> Option<usize> {
        let key = key.raw();
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = &self.entries[mid];
            let masked = key & entry.mask;
            if entry.key == masked {
                return Some(mid);
            }
            if entry.key < masked {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        None
    }

    /// Look up `key`, reporting misses and empty routes separately
    #[inline]
    pub fn lookup_counted(&self, key: SpikeKey) -> LookupOutcome {
        let Some(index) = self.find(key) else {
            return LookupOutcome::Miss;
        };
        let entry = &self.entries[index];
        let descriptor = entry.descriptor;
        let local_index = key.raw() & !entry.mask;

        let target = if descriptor.is_direct() {
            Target::Direct {
                word_index: descriptor.direct_offset() as usize + local_index as usize,
            }
        } else if descriptor.is_empty() {
            return LookupOutcome::EmptyRoute;
        } else {
            let stride = descriptor.stride();
            Target::Row {
                address: u64::from(descriptor.base()) + u64::from(stride) * u64::from(local_index),
                n_words: stride,
            }
        };

        LookupOutcome::Hit(RowLocation {
            entry: index,
            key,
            local_index,
            target,
        })
    }

    /// Look up `key`; misses and empty routes both yield `None`
    #[inline]
    pub fn lookup(&self, key: SpikeKey) -> Option<RowLocation> {
        self.lookup_counted(key).location()
    }

    /// Replace the descriptor of entry `index`
    pub fn replace_descriptor(&mut self, index: usize, descriptor: RowDescriptor) -> Result<()> {
        let max = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(spyke_storage::StorageError::OutOfBounds { index, max })?;
        entry.descriptor = descriptor;
        Ok(())
    }

    /// Insert an entry at its sorted position
    pub fn insert(&mut self, entry: RoutingEntry) -> Result<usize> {
        let at = self.entries.partition_point(|e| e.key < entry.key);
        let mut next = self.entries.clone();
        next.insert(at, entry);
        validate_entries(&next)?;
        self.entries = next;
        Ok(at)
    }

    /// Remove the entry with exactly this key
    pub fn remove(&mut self, key: u32) -> Option<RoutingEntry> {
        let at = self.entries.binary_search_by_key(&key, |e| e.key).ok()?;
        Some(self.entries.remove(at))
    }
}
