//! Fixed synapse word codec
//!
//! A fixed synapse is one 32-bit word:
//!
//! ```text
//!  31            16 15 ...                                   0
//! +----------------+-------------+------------+--------------+
//! |     weight     |    delay    |    type    | neuron index |
//! +----------------+-------------+------------+--------------+
//!                   <delay_bits>  <type_bits>   <index_bits>
//! ```
//!
//! The low `type_bits + index_bits` bits double as the type/neuron part of a
//! ring-buffer index, so decode and accumulate share one mask.

use crate::error::{Result, StorageError};

/// Number of weight bits at the top of a fixed synapse word
pub const WEIGHT_BITS: u32 = 16;

/// Bits below the weight available for delay, type and index
pub const CONTROL_BITS: u32 = 32 - WEIGHT_BITS;

/// Default delay field width (16-slot delay ring)
pub const DEFAULT_DELAY_BITS: u32 = 4;

/// Smallest `b` with `2^b >= n` (0 for `n <= 1`)
pub const fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - (n - 1).leading_zeros()
    }
}

/// Bit-field widths of the synapse word layout for one core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SynapseFormat {
    index_bits: u32,
    type_bits: u32,
    delay_bits: u32,
}

impl SynapseFormat {
    /// Build a layout from explicit widths
    pub fn new(index_bits: u32, type_bits: u32, delay_bits: u32) -> Result<Self> {
        if delay_bits == 0 || delay_bits > 8 {
            return Err(StorageError::invalid_synapse_format(format!(
                "delay_bits {} must be in 1..=8",
                delay_bits
            )));
        }
        if type_bits > 8 {
            return Err(StorageError::invalid_synapse_format(format!(
                "type_bits {} must be <= 8",
                type_bits
            )));
        }
        let used = index_bits + type_bits + delay_bits;
        if used > CONTROL_BITS {
            return Err(StorageError::invalid_synapse_format(format!(
                "index_bits + type_bits + delay_bits = {} exceeds {}",
                used, CONTROL_BITS
            )));
        }
        Ok(Self {
            index_bits,
            type_bits,
            delay_bits,
        })
    }

    /// Derive the layout from a core's neuron and synapse-type counts,
    /// rounding each up to the next power of two
    pub fn for_core(n_neurons: u32, n_synapse_types: u32, delay_bits: u32) -> Result<Self> {
        if n_neurons == 0 {
            return Err(StorageError::invalid_synapse_format("core has no neurons"));
        }
        if n_synapse_types == 0 {
            return Err(StorageError::invalid_synapse_format("core has no synapse types"));
        }
        Self::new(ceil_log2(n_neurons), ceil_log2(n_synapse_types), delay_bits)
    }

    /// Width of the neuron index field
    pub const fn index_bits(&self) -> u32 {
        self.index_bits
    }

    /// Width of the synapse type field
    pub const fn type_bits(&self) -> u32 {
        self.type_bits
    }

    /// Width of the delay field
    pub const fn delay_bits(&self) -> u32 {
        self.delay_bits
    }

    /// Combined width of type and index
    pub const fn type_index_bits(&self) -> u32 {
        self.type_bits + self.index_bits
    }

    /// Total width of delay, type and index (log2 of the ring buffer size)
    pub const fn ring_bits(&self) -> u32 {
        self.delay_bits + self.type_bits + self.index_bits
    }

    #[inline]
    pub(crate) const fn mask(bits: u32) -> u32 {
        if bits >= 32 {
            u32::MAX
        } else {
            (1u32 << bits) - 1
        }
    }

    /// Mask of the neuron index field
    pub const fn index_mask(&self) -> u32 {
        Self::mask(self.index_bits)
    }

    /// Mask of the synapse type field (after shifting)
    pub const fn type_mask(&self) -> u32 {
        Self::mask(self.type_bits)
    }

    /// Mask of the delay field (after shifting)
    pub const fn delay_mask(&self) -> u32 {
        Self::mask(self.delay_bits)
    }

    /// Mask of the combined type and index fields
    pub const fn type_index_mask(&self) -> u32 {
        Self::mask(self.type_index_bits())
    }

    /// Largest delay the layout can express (also one less than the ring period)
    pub const fn max_delay(&self) -> u32 {
        self.delay_mask()
    }

    /// Number of neuron slots addressed by the index field
    pub const fn neuron_slots(&self) -> u32 {
        1 << self.index_bits
    }

    /// Number of synapse type slots addressed by the type field
    pub const fn type_slots(&self) -> u32 {
        1 << self.type_bits
    }
}

/// One decoded fixed synapse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedSynapse {
    /// Unsigned fixed-point weight
    pub weight: u16,
    /// Delay in timesteps
    pub delay: u8,
    /// Synapse type (e.g. excitatory, inhibitory)
    pub synapse_type: u8,
    /// Target neuron index on this core
    pub index: u16,
}

impl FixedSynapse {
    /// Create a synapse from its fields
    pub const fn new(weight: u16, delay: u8, synapse_type: u8, index: u16) -> Self {
        Self {
            weight,
            delay,
            synapse_type,
            index,
        }
    }

    /// Rebuild a synapse from a 16-bit plastic control word plus a weight held elsewhere
    #[inline]
    pub fn from_control(control: u16, weight: u16, format: &SynapseFormat) -> Self {
        let mut syn = decode_fixed_synapse(u32::from(control), format);
        syn.weight = weight;
        syn
    }

    /// The type/index part used as the low bits of a ring-buffer index
    #[inline]
    pub fn type_index(&self, format: &SynapseFormat) -> u32 {
        (u32::from(self.synapse_type) & format.type_mask()) << format.index_bits()
            | (u32::from(self.index) & format.index_mask())
    }
}

/// Decode one fixed synapse word
///
/// Pure bit extraction; any word decodes to some synapse.
#[inline]
pub fn decode_fixed_synapse(word: u32, format: &SynapseFormat) -> FixedSynapse {
    let index = word & format.index_mask();
    let synapse_type = (word >> format.index_bits()) & format.type_mask();
    let delay = (word >> format.type_index_bits()) & format.delay_mask();
    let weight = word >> CONTROL_BITS;
    FixedSynapse {
        weight: weight as u16,
        delay: delay as u8,
        synapse_type: synapse_type as u8,
        index: index as u16,
    }
}

/// Pack one fixed synapse into a word
///
/// Fields wider than their declared widths are a caller contract violation;
/// the excess bits are masked off so they cannot bleed into neighbours.
#[inline]
pub fn encode_fixed_synapse(synapse: &FixedSynapse, format: &SynapseFormat) -> u32 {
    (u32::from(synapse.weight) << CONTROL_BITS)
        | ((u32::from(synapse.delay) & format.delay_mask()) << format.type_index_bits())
        | synapse.type_index(format)
}

/// Pack the control half (delay, type, index) of a plastic synapse
#[inline]
pub fn encode_plastic_control(synapse: &FixedSynapse, format: &SynapseFormat) -> u16 {
    (encode_fixed_synapse(synapse, format) & 0xFFFF) as u16
}

/// Extract the type/index bits of a fixed synapse word
#[inline]
pub fn synapse_type_index(word: u32, format: &SynapseFormat) -> u32 {
    word & format.type_index_mask()
}
