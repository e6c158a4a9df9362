//! Plasticity collaborator interface
//!
//! The pipeline hands every row with a plastic part to a
//! [`PlasticityHandler`]. The handler owns the meaning of the plastic
//! region: it may contribute to the ring buffer from it and may rewrite it
//! in place, in which case the pipeline writes the region back to row
//! storage after a successful call.

use spyke_storage::{FixedRegion, FixedSynapse};

use crate::ring_buffer::RingBuffer;

/// Processes the plastic part of synaptic rows
pub trait PlasticityHandler {
    /// Process one row for one spike arriving at `time`
    ///
    /// Returns false if the row could not be handled; the pipeline then
    /// counts a failure and skips the write-back.
    fn process_plastic_row(
        &mut self,
        time: u32,
        plastic: &mut [u32],
        fixed: FixedRegion<'_>,
        ring: &mut RingBuffer,
    ) -> bool;

    /// A local neuron fired at `time`
    fn process_post_synaptic_event(&mut self, _time: u32, _neuron: u32) {}

    /// True if `process_plastic_row` may change the plastic region
    fn mutates_rows(&self) -> bool {
        false
    }

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Rows carry no plastic synapses
///
/// Any plastic region is ignored. Rows that declare plastic control words
/// cannot be served and are reported as failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSynapses;

impl PlasticityHandler for StaticSynapses {
    fn process_plastic_row(
        &mut self,
        _time: u32,
        _plastic: &mut [u32],
        fixed: FixedRegion<'_>,
        _ring: &mut RingBuffer,
    ) -> bool {
        fixed.plastic_control_count() == 0
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Plastic synapses with weights that never change
///
/// The plastic region holds one 16-bit weight per control halfword, two
/// per word with the low half first, matching the control packing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrozenWeights;

impl PlasticityHandler for FrozenWeights {
    fn process_plastic_row(
        &mut self,
        time: u32,
        plastic: &mut [u32],
        fixed: FixedRegion<'_>,
        ring: &mut RingBuffer,
    ) -> bool {
        apply_halfword_weights(time, plastic, fixed, ring, |w| w)
    }

    fn name(&self) -> &'static str {
        "frozen"
    }
}

/// Plastic synapses whose weights shrink every time they are used
///
/// Same layout as [`FrozenWeights`]. After contributing, each weight loses
/// `weight >> shift`, and the updated region is written back to row storage.
#[derive(Debug, Clone, Copy)]
pub struct WeightDecay {
    shift: u32,
}

impl WeightDecay {
    /// Default decay of one sixteenth per use
    pub const DEFAULT_SHIFT: u32 = 4;

    /// Decay by `weight >> shift` per use; `shift` is clamped to 15
    pub fn new(shift: u32) -> Self {
        Self { shift: shift.min(15) }
    }

    /// Decay shift
    pub fn shift(&self) -> u32 {
        self.shift
    }
}

impl Default for WeightDecay {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SHIFT)
    }
}

impl PlasticityHandler for WeightDecay {
    fn process_plastic_row(
        &mut self,
        time: u32,
        plastic: &mut [u32],
        fixed: FixedRegion<'_>,
        ring: &mut RingBuffer,
    ) -> bool {
        let shift = self.shift;
        apply_halfword_weights(time, plastic, fixed, ring, |w| w - (w >> shift))
    }

    fn mutates_rows(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "decay"
    }
}

/// Contribute one halfword weight per plastic control, then store `update(weight)`
fn apply_halfword_weights(
    time: u32,
    plastic: &mut [u32],
    fixed: FixedRegion<'_>,
    ring: &mut RingBuffer,
    update: impl Fn(u16) -> u16,
) -> bool {
    if plastic.len() * 2 < fixed.plastic_control_count() {
        return false;
    }
    let format = *ring.format();
    for (i, control) in fixed.plastic_controls().enumerate() {
        let word = &mut plastic[i / 2];
        let shift = if i % 2 == 0 { 0 } else { 16 };
        let weight = (*word >> shift) as u16;
        let synapse = FixedSynapse::from_control(control, weight, &format);
        ring.accumulate_synapse(time, &synapse);
        *word = (*word & !(0xFFFF << shift)) | (u32::from(update(weight)) << shift);
    }
    true
}

/// Plasticity collaborator selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum PlasticityKind {
    /// [`StaticSynapses`]
    #[default]
    Static,
    /// [`FrozenWeights`]
    Frozen,
    /// [`WeightDecay`] with its default shift
    Decay,
}

impl PlasticityKind {
    /// Instantiate the collaborator
    pub fn build(self) -> Box<dyn PlasticityHandler> {
        match self {
            Self::Static => Box::new(StaticSynapses),
            Self::Frozen => Box::new(FrozenWeights),
            Self::Decay => Box::new(WeightDecay::default()),
        }
    }

    /// Configuration name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Frozen => "frozen",
            Self::Decay => "decay",
        }
    }
}

impl core::str::FromStr for PlasticityKind {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Self::Static),
            "frozen" => Ok(Self::Frozen),
            "decay" => Ok(Self::Decay),
            other => Err(crate::CoreError::invalid_parameter(
                "plasticity",
                other,
                "static, frozen or decay",
            )),
        }
    }
}
