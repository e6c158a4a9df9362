//! Delay ring buffer accumulating synaptic input per (time slot, type, neuron)
//!
//! ```text
//! index = ((time + delay) & delay_mask) << type_index_bits
//!       | synapse_type << index_bits
//!       | neuron
//! ```
//!
//! Slots are unsigned 16-bit and saturate at `0xFFFF`. The slice for the
//! current time is read and zeroed by the timer tick once per timestep, so a
//! contribution with delay `d` lands in the input of timestep `time + d`.

use spyke_storage::{FixedSynapse, SynapseFormat};

use crate::error::*;
use crate::fixed::Accum;

/// Largest accepted input shift
pub const MAX_INPUT_SHIFT: u8 = 16;

/// Circular accumulator indexed by delay slot, synapse type and neuron
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Vec<u16>,
    format: SynapseFormat,
    saturations: u64,
    type_saturations: Vec<u64>,
}

impl RingBuffer {
    /// Allocate a zeroed buffer of `2^(delay_bits + type_bits + index_bits)` slots
    pub fn new(format: SynapseFormat) -> Result<Self> {
        let len = 1usize << format.ring_bits();
        let slots = try_alloc("ring buffer", len, 0u16)?;
        let type_saturations =
            try_alloc("saturation counters", format.type_slots() as usize, 0u64)?;
        log::debug!(
            "ring buffer allocated: {} slots ({} delay x {} type x {} neuron)",
            len,
            format.max_delay() + 1,
            format.type_slots(),
            format.neuron_slots()
        );
        Ok(Self {
            slots,
            format,
            saturations: 0,
            type_saturations,
        })
    }

    /// Layout this buffer is indexed by
    pub fn format(&self) -> &SynapseFormat {
        &self.format
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring buffer has at least one slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot index for a contribution arriving `delay` steps after `time`
    #[inline(always)]
    pub fn index(&self, time: u32, delay: u32, synapse_type: u32, neuron: u32) -> usize {
        let f = &self.format;
        let slot = time.wrapping_add(delay) & f.delay_mask();
        ((slot << f.type_index_bits())
            | ((synapse_type & f.type_mask()) << f.index_bits())
            | (neuron & f.index_mask())) as usize
    }

    #[inline(always)]
    fn add_at(&mut self, index: usize, synapse_type: usize, weight: u16) -> bool {
        let current = self.slots[index];
        match current.checked_add(weight) {
            Some(sum) => {
                self.slots[index] = sum;
                false
            }
            None => {
                self.slots[index] = u16::MAX;
                if current != u16::MAX {
                    self.saturations += 1;
                    if let Some(count) = self.type_saturations.get_mut(synapse_type) {
                        *count += 1;
                    }
                }
                true
            }
        }
    }

    /// Add `weight` into the slot for `(time + delay, type, neuron)`
    ///
    /// Returns true when the add was clamped.
    #[inline]
    pub fn accumulate(
        &mut self,
        time: u32,
        delay: u32,
        synapse_type: u32,
        neuron: u32,
        weight: u16,
    ) -> bool {
        let index = self.index(time, delay, synapse_type, neuron);
        let ty = (synapse_type & self.format.type_mask()) as usize;
        self.add_at(index, ty, weight)
    }

    /// Add a decoded synapse's weight
    #[inline]
    pub fn accumulate_synapse(&mut self, time: u32, synapse: &FixedSynapse) -> bool {
        self.accumulate(
            time,
            u32::from(synapse.delay),
            u32::from(synapse.synapse_type),
            u32::from(synapse.index),
            synapse.weight,
        )
    }

    /// Add a packed fixed synapse word without a full decode
    #[inline(always)]
    pub fn accumulate_word(&mut self, time: u32, word: u32) -> bool {
        let f = &self.format;
        let tib = f.type_index_bits();
        let delay = (word >> tib) & f.delay_mask();
        let slot = time.wrapping_add(delay) & f.delay_mask();
        let index = ((slot << tib) | (word & f.type_index_mask())) as usize;
        let ty = ((word >> f.index_bits()) & f.type_mask()) as usize;
        self.add_at(index, ty, (word >> 16) as u16)
    }

    /// Value currently held for `(time + delay, type, neuron)`
    pub fn peek(&self, time: u32, delay: u32, synapse_type: u32, neuron: u32) -> u16 {
        self.slots[self.index(time, delay, synapse_type, neuron)]
    }

    /// Read and zero the current-time slot for one type and neuron
    #[inline]
    pub fn drain_and_clear(&mut self, time: u32, synapse_type: u32, neuron: u32) -> u16 {
        let index = self.index(time, 0, synapse_type, neuron);
        core::mem::take(&mut self.slots[index])
    }

    /// Convert every type and neuron of `time`'s slice into `inputs`, then zero the slice
    ///
    /// The whole slice is cleared, including padding slots past
    /// `n_neurons`/`n_types`, so the slot is zero before it is reused one
    /// ring period later.
    pub fn drain_timestep(
        &mut self,
        time: u32,
        converter: &InputConverter,
        inputs: &mut SynapticInputs,
    ) {
        let f = self.format;
        let slice_len = 1usize << f.type_index_bits();
        let base = ((time & f.delay_mask()) as usize) << f.type_index_bits();
        let slice = &mut self.slots[base..base + slice_len];
        let neuron_slots = f.neuron_slots() as usize;
        let n_types = inputs.n_types.min(f.type_slots() as usize);
        let n_neurons = inputs.n_neurons.min(neuron_slots);

        inputs.time = time;
        for ty in 0..n_types {
            let row = &slice[ty * neuron_slots..ty * neuron_slots + n_neurons];
            for (neuron, &raw) in row.iter().enumerate() {
                let at = ty * inputs.n_neurons + neuron;
                inputs.raw[at] = raw;
                inputs.values[at] = converter.to_input(ty, raw);
            }
        }
        slice.fill(0);
    }

    /// Sum of every slot, for conservation checks
    pub fn pending_total(&self) -> u64 {
        self.slots.iter().map(|&v| u64::from(v)).sum()
    }

    /// Adds that clamped a slot at `0xFFFF`
    pub fn saturations(&self) -> u64 {
        self.saturations
    }

    /// Clamping adds per synapse type
    pub fn type_saturations(&self) -> &[u64] {
        &self.type_saturations
    }
}

/// Per-type shift table turning ring-buffer magnitudes into neuron input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputConverter {
    shifts: Vec<u8>,
}

impl InputConverter {
    /// Create a converter with one shift per synapse type
    pub fn new(shifts: Vec<u8>) -> Result<Self> {
        if shifts.is_empty() {
            return Err(CoreError::invalid_parameter("input_shifts", "[]", "one per synapse type"));
        }
        if let Some(&bad) = shifts.iter().find(|&&s| s > MAX_INPUT_SHIFT) {
            return Err(CoreError::invalid_parameter(
                "input_shifts",
                bad.to_string(),
                format!("<= {}", MAX_INPUT_SHIFT),
            ));
        }
        Ok(Self { shifts })
    }

    /// Shift applied to `synapse_type`
    pub fn shift(&self, synapse_type: usize) -> u8 {
        self.shifts.get(synapse_type).copied().unwrap_or(0)
    }

    /// `value << shift` read as s16.15
    #[inline]
    pub fn to_input(&self, synapse_type: usize, value: u16) -> Accum {
        Accum::from_weight(value, self.shift(synapse_type))
    }
}

/// Inputs handed to the neuron stage for one timestep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynapticInputs {
    time: u32,
    n_types: usize,
    n_neurons: usize,
    raw: Vec<u16>,
    values: Vec<Accum>,
}

impl SynapticInputs {
    /// Allocate zeroed inputs for `n_types` x `n_neurons`
    pub fn new(n_types: usize, n_neurons: usize) -> Result<Self> {
        let len = n_types.saturating_mul(n_neurons);
        Ok(Self {
            time: 0,
            n_types,
            n_neurons,
            raw: try_alloc("synaptic inputs", len, 0u16)?,
            values: try_alloc("synaptic inputs", len, Accum::ZERO)?,
        })
    }

    /// Timestep these inputs belong to
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Synapse types
    pub fn n_types(&self) -> usize {
        self.n_types
    }

    /// Neurons
    pub fn n_neurons(&self) -> usize {
        self.n_neurons
    }

    /// Converted input for one type and neuron
    pub fn get(&self, synapse_type: usize, neuron: usize) -> Accum {
        if synapse_type >= self.n_types || neuron >= self.n_neurons {
            return Accum::ZERO;
        }
        self.values[synapse_type * self.n_neurons + neuron]
    }

    /// Unconverted ring-buffer value for one type and neuron
    pub fn raw(&self, synapse_type: usize, neuron: usize) -> u16 {
        if synapse_type >= self.n_types || neuron >= self.n_neurons {
            return 0;
        }
        self.raw[synapse_type * self.n_neurons + neuron]
    }

    /// Converted inputs of one type, indexed by neuron
    pub fn of_type(&self, synapse_type: usize) -> &[Accum] {
        let start = (synapse_type * self.n_neurons).min(self.values.len());
        let end = (start + self.n_neurons).min(self.values.len());
        &self.values[start..end]
    }

    /// Sum of the raw values
    pub fn total_raw(&self) -> u64 {
        self.raw.iter().map(|&v| u64::from(v)).sum()
    }

    /// Iterate `(type, neuron, raw)` for every non-zero raw value
    pub fn nonzero(&self) -> impl Iterator<Item = (usize, usize, u16)> + '_ {
        let n = self.n_neurons.max(1);
        self.raw
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v != 0)
            .map(move |(i, &v)| (i / n, i % n, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> SynapseFormat {
        // 4 delay bits, 1 type bit, 4 index bits
        SynapseFormat::new(4, 1, 4).unwrap()
    }

    #[test]
    fn test_size_and_index() {
        let ring = RingBuffer::new(format()).unwrap();
        assert_eq!(ring.len(), 1 << 9);
        assert_eq!(ring.index(0, 3, 1, 5), (3 << 5) | (1 << 4) | 5);
        // wraps modulo the ring period
        assert_eq!(ring.index(15, 2, 0, 0), 1 << 5);
        assert_eq!(ring.index(u32::MAX, 1, 0, 0), 0);
    }

    #[test]
    fn test_accumulate_sums() {
        let mut ring = RingBuffer::new(format()).unwrap();
        ring.accumulate(0, 2, 0, 3, 100);
        ring.accumulate(0, 2, 0, 3, 50);
        assert_eq!(ring.peek(0, 2, 0, 3), 150);
        assert_eq!(ring.peek(2, 0, 0, 3), 150);
        assert_eq!(ring.drain_and_clear(2, 0, 3), 150);
        assert_eq!(ring.drain_and_clear(2, 0, 3), 0);
    }

    #[test]
    fn test_saturation_counted_once_per_clamp() {
        let mut ring = RingBuffer::new(format()).unwrap();
        assert!(!ring.accumulate(0, 1, 1, 2, 60000));
        assert!(ring.accumulate(0, 1, 1, 2, 40000));
        assert!(ring.accumulate(0, 1, 1, 2, 5000));
        assert_eq!(ring.peek(0, 1, 1, 2), 0xFFFF);
        assert_eq!(ring.saturations(), 1);
        assert_eq!(ring.type_saturations(), &[0, 1]);
    }

    #[test]
    fn test_accumulate_word_matches_decode() {
        let f = format();
        let mut a = RingBuffer::new(f).unwrap();
        let mut b = RingBuffer::new(f).unwrap();
        let syn = FixedSynapse::new(1234, 7, 1, 9);
        let word = spyke_storage::encode_fixed_synapse(&syn, &f);
        a.accumulate_word(5, word);
        b.accumulate_synapse(5, &syn);
        assert_eq!(a.slots, b.slots);
        assert_eq!(a.peek(12, 0, 1, 9), 1234);
    }

    #[test]
    fn test_drain_timestep_converts_and_clears() {
        let f = format();
        let mut ring = RingBuffer::new(f).unwrap();
        let converter = InputConverter::new(vec![15, 14]).unwrap();
        let mut inputs = SynapticInputs::new(2, 10).unwrap();

        ring.accumulate(3, 1, 0, 4, 2);
        ring.accumulate(3, 1, 1, 9, 2);
        // padding neuron beyond n_neurons
        ring.accumulate(3, 1, 0, 15, 7);
        ring.accumulate(3, 2, 0, 4, 1);

        ring.drain_timestep(4, &converter, &mut inputs);
        assert_eq!(inputs.time(), 4);
        assert_eq!(inputs.get(0, 4), Accum::from_f32(2.0));
        assert_eq!(inputs.get(1, 9), Accum::ONE);
        assert_eq!(inputs.raw(0, 4), 2);
        assert_eq!(inputs.total_raw(), 4);
        assert_eq!(inputs.nonzero().collect::<Vec<_>>(), vec![(0, 4, 2), (1, 9, 2)]);

        // slot 4 fully cleared, slot 5 untouched
        assert_eq!(ring.pending_total(), 1);
        assert_eq!(ring.peek(5, 0, 0, 4), 1);
    }

    #[test]
    fn test_converter_rejects_large_shift() {
        assert!(InputConverter::new(vec![17]).is_err());
        assert!(InputConverter::new(vec![]).is_err());
        let c = InputConverter::new(vec![16]).unwrap();
        assert_eq!(c.to_input(0, 1), Accum::from_f32(2.0));
        assert_eq!(c.to_input(3, 1).to_bits(), 1);
    }
}
