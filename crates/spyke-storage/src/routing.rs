//! Persisted routing table layout
//!
//! A `u32` entry count followed by 12-byte little-endian entries
//! `{key, mask, offset_and_length}`. The third word is a [`RowDescriptor`].

use core::fmt;

use crate::error::{Result, StorageError};
use crate::le::read_u32_le;

/// Bytes per persisted routing entry
pub const ENTRY_BYTES: usize = 12;

/// Descriptor bit marking a direct (single-synapse) route
pub const DIRECT_FLAG: u32 = 0x8000_0000;

/// Bits holding the row stride of a generic route
pub const STRIDE_BITS: u32 = 8;

/// Longest row slot a generic route can describe, in words
pub const MAX_ROW_STRIDE: u32 = (1 << STRIDE_BITS) - 1;

/// Largest base word offset of a generic route
pub const MAX_ROW_BASE: u32 = (DIRECT_FLAG >> STRIDE_BITS) - 1;

/// Largest direct-row word offset
pub const MAX_DIRECT_OFFSET: u32 = DIRECT_FLAG - 1;

/// Packed location of the rows driven by one routing entry
///
/// * direct: bit 31 set, bits 0..=30 index the direct-row word array
/// * generic: bits 8..=30 base word offset, bits 0..=7 stride in words
///
/// A generic descriptor with stride zero means "no route".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RowDescriptor(pub u32);

impl RowDescriptor {
    /// A descriptor that routes nowhere
    pub const EMPTY: Self = Self(0);

    /// Generic rows at `base + stride * local_index`
    pub fn row(base: u32, stride: u32) -> Result<Self> {
        if base > MAX_ROW_BASE {
            return Err(StorageError::FieldOverflow {
                field: "row base",
                value: u64::from(base),
                max: u64::from(MAX_ROW_BASE),
            });
        }
        if stride > MAX_ROW_STRIDE {
            return Err(StorageError::FieldOverflow {
                field: "row stride",
                value: u64::from(stride),
                max: u64::from(MAX_ROW_STRIDE),
            });
        }
        Ok(Self((base << STRIDE_BITS) | stride))
    }

    /// Direct rows starting at `offset` in the direct-row word array
    pub fn direct(offset: u32) -> Result<Self> {
        if offset > MAX_DIRECT_OFFSET {
            return Err(StorageError::FieldOverflow {
                field: "direct offset",
                value: u64::from(offset),
                max: u64::from(MAX_DIRECT_OFFSET),
            });
        }
        Ok(Self(DIRECT_FLAG | offset))
    }

    /// Raw persisted word
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True for a single-synapse route
    pub const fn is_direct(self) -> bool {
        self.0 & DIRECT_FLAG != 0
    }

    /// True for a generic route whose stride is zero
    pub const fn is_empty(self) -> bool {
        !self.is_direct() && self.stride() == 0
    }

    /// Offset into the direct-row word array (direct routes only)
    pub const fn direct_offset(self) -> u32 {
        self.0 & !DIRECT_FLAG
    }

    /// Base word offset (generic routes only)
    pub const fn base(self) -> u32 {
        (self.0 & !DIRECT_FLAG) >> STRIDE_BITS
    }

    /// Row slot width in words (generic routes only)
    pub const fn stride(self) -> u32 {
        self.0 & MAX_ROW_STRIDE
    }
}

impl fmt::Debug for RowDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_direct() {
            write!(f, "Direct(@{})", self.direct_offset())
        } else {
            write!(f, "Row(@{}, stride {})", self.base(), self.stride())
        }
    }
}

/// One entry of the routing table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutingEntry {
    /// Key bits that must match under `mask`
    pub key: u32,
    /// Bits of an incoming key that identify this entry
    pub mask: u32,
    /// Where this entry's rows live
    pub descriptor: RowDescriptor,
}

impl RoutingEntry {
    /// Create a new entry
    pub const fn new(key: u32, mask: u32, descriptor: RowDescriptor) -> Self {
        Self {
            key,
            mask,
            descriptor,
        }
    }

    /// True when `spike_key & mask == key`
    #[inline]
    pub const fn matches(&self, spike_key: u32) -> bool {
        spike_key & self.mask == self.key
    }

    /// True when some key would match both entries
    pub const fn overlaps(&self, other: &RoutingEntry) -> bool {
        (self.key ^ other.key) & self.mask & other.mask == 0
    }
}

/// True for masks of the form `!0 << n`
///
/// Masked binary search only orders correctly over prefix masks.
pub const fn is_prefix_mask(mask: u32) -> bool {
    mask.leading_ones() + mask.trailing_zeros() == 32
}

/// Check the builder invariants the binary search relies on
///
/// * every mask is a prefix mask
/// * no key bit outside its mask
/// * strictly ascending keys
/// * no two entries match a common key
pub fn validate_entries(entries: &[RoutingEntry]) -> Result<()> {
    for (i, entry) in entries.iter().enumerate() {
        if !is_prefix_mask(entry.mask) {
            return Err(StorageError::invalid_routing(
                i,
                format!("mask 0x{:08x} is not a contiguous run of high bits", entry.mask),
            ));
        }
        if entry.key & !entry.mask != 0 {
            return Err(StorageError::invalid_routing(
                i,
                format!("key 0x{:08x} has bits outside mask 0x{:08x}", entry.key, entry.mask),
            ));
        }
        if i > 0 && entries[i - 1].key >= entry.key {
            return Err(StorageError::invalid_routing(
                i,
                format!(
                    "key 0x{:08x} not above previous key 0x{:08x}",
                    entry.key,
                    entries[i - 1].key
                ),
            ));
        }
    }
    // Sorted order does not rule out a wide mask covering a later entry,
    // so every pair is checked. Tables are small and this runs offline.
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            if entries[i].overlaps(&entries[j]) {
                return Err(StorageError::invalid_routing(
                    j,
                    format!("overlaps entry {} in masked key space", i),
                ));
            }
        }
    }
    Ok(())
}

/// Serialize entries to the persisted layout
pub fn encode_table(entries: &[RoutingEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + entries.len() * ENTRY_BYTES);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.key.to_le_bytes());
        out.extend_from_slice(&entry.mask.to_le_bytes());
        out.extend_from_slice(&entry.descriptor.raw().to_le_bytes());
    }
    out
}

/// Parse the persisted layout, which must fill `bytes` exactly
///
/// The ordering invariants are not checked here.
pub fn decode_table(bytes: &[u8]) -> Result<Vec<RoutingEntry>> {
    let count = read_u32_le(bytes, 0)? as usize;
    let needed = count
        .checked_mul(ENTRY_BYTES)
        .and_then(|n| n.checked_add(4))
        .ok_or_else(|| StorageError::invalid_format("routing entry count overflow"))?;
    if bytes.len() != needed {
        return Err(StorageError::invalid_format(format!(
            "routing table of {} entries is {} bytes, section holds {}",
            count,
            needed,
            bytes.len()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let at = 4 + i * ENTRY_BYTES;
        entries.push(RoutingEntry {
            key: read_u32_le(bytes, at)?,
            mask: read_u32_le(bytes, at + 4)?,
            descriptor: RowDescriptor(read_u32_le(bytes, at + 8)?),
        });
    }
    Ok(entries)
}

/// Encoded size of a table with `count` entries
pub const fn encoded_len(count: usize) -> usize {
    4 + count * ENTRY_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_entries() -> Vec<RoutingEntry> {
        vec![
            RoutingEntry::new(0x0000_0000, 0xFFFF_FF00, RowDescriptor::row(100, 4).unwrap()),
            RoutingEntry::new(0x0000_0100, 0xFFFF_FF00, RowDescriptor::row(200, 4).unwrap()),
        ]
    }

    #[test]
    fn test_descriptor_packing() {
        let d = RowDescriptor::row(1234, 17).unwrap();
        assert!(!d.is_direct());
        assert!(!d.is_empty());
        assert_eq!(d.base(), 1234);
        assert_eq!(d.stride(), 17);

        let d = RowDescriptor::direct(55).unwrap();
        assert!(d.is_direct());
        assert_eq!(d.direct_offset(), 55);

        assert!(RowDescriptor::row(10, 0).unwrap().is_empty());
        assert!(RowDescriptor::EMPTY.is_empty());
        assert!(RowDescriptor::row(MAX_ROW_BASE + 1, 1).is_err());
        assert!(RowDescriptor::row(0, 256).is_err());
        assert!(RowDescriptor::direct(DIRECT_FLAG).is_err());
    }

    #[test]
    fn test_validate_accepts_disjoint_sorted() {
        assert!(validate_entries(&two_entries()).is_ok());
        assert!(validate_entries(&[]).is_ok());
    }

    #[test]
    fn test_validate_rejects_unsorted() {
        let mut entries = two_entries();
        entries.swap(0, 1);
        assert!(matches!(
            validate_entries(&entries),
            Err(StorageError::InvalidRoutingTable { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let entries = vec![
            RoutingEntry::new(0x0000_0000, 0xFFFF_0000, RowDescriptor::EMPTY),
            RoutingEntry::new(0x0000_0100, 0xFFFF_FF00, RowDescriptor::EMPTY),
        ];
        assert!(matches!(
            validate_entries(&entries),
            Err(StorageError::InvalidRoutingTable { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_key_outside_mask() {
        let entries = vec![RoutingEntry::new(0x0000_0001, 0xFFFF_FF00, RowDescriptor::EMPTY)];
        assert!(validate_entries(&entries).is_err());
    }

    #[test]
    fn test_prefix_masks() {
        assert!(is_prefix_mask(0));
        assert!(is_prefix_mask(u32::MAX));
        assert!(is_prefix_mask(0xFFFF_FF00));
        assert!(!is_prefix_mask(0x0F00));
        assert!(!is_prefix_mask(0xFF00_FF00));

        let entries = vec![RoutingEntry::new(0x0000_0F00, 0x0000_0F00, RowDescriptor::EMPTY)];
        assert!(validate_entries(&entries).is_err());
    }

    #[test]
    fn test_table_encoding() {
        let entries = two_entries();
        let bytes = encode_table(&entries);
        assert_eq!(bytes.len(), encoded_len(2));
        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0xFFFF_FF00u32.to_le_bytes());
        assert_eq!(decode_table(&bytes).unwrap(), entries);

        assert!(decode_table(&bytes[..20]).is_err());
        assert!(decode_table(&[]).is_err());

        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0; 4]);
        assert!(matches!(
            decode_table(&padded),
            Err(StorageError::InvalidFormat { .. })
        ));
    }
}
