//! Core configuration

use spyke_lockfree::constants::DEFAULT_SPIKE_QUEUE_SIZE;
use spyke_storage::routing::MAX_ROW_STRIDE;
use spyke_storage::synapse::DEFAULT_DELAY_BITS;
use spyke_storage::{ImageMeta, SynapseFormat};

use crate::error::*;
use crate::plasticity::PlasticityKind;

/// How row transfers are scheduled against spike processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum TransferMode {
    /// Issue the transfer, return, resume on completion (double-buffered)
    #[default]
    Async,
    /// Block until the transfer completes, then decode in the same call
    BusyWait,
}

/// Row transfer engine parameters
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TransferConfig {
    /// Scheduling discipline
    pub mode: TransferMode,
    /// Fixed cost of every transfer in engine cycles
    pub setup_cycles: u32,
    /// Words moved per engine cycle
    pub words_per_cycle: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::Async,
            setup_cycles: 2,
            words_per_cycle: 8,
        }
    }
}

impl TransferConfig {
    /// Engine cycles to move `n_words`
    pub fn cycles_for(&self, n_words: usize) -> u32 {
        let per = self.words_per_cycle.max(1) as usize;
        self.setup_cycles
            .saturating_add(((n_words + per - 1) / per).min(u32::MAX as usize) as u32)
            .max(1)
    }
}

/// Configuration of one synaptic core
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CoreConfig {
    /// Neurons simulated by this core
    pub n_neurons: u32,
    /// Synapse types per neuron
    pub n_synapse_types: u32,
    /// Width of the delay field (ring period is `2^delay_bits`)
    pub delay_bits: u32,
    /// Ingestion queue slots (power of two; one is kept empty)
    pub queue_capacity: usize,
    /// Words per scratch buffer; longer rows are rejected
    pub max_row_words: usize,
    /// Per-type left shift converting ring-buffer magnitudes to input units
    pub input_shifts: Vec<u8>,
    /// Engine cycles the timer tick may spend finishing outstanding work
    pub poll_budget: u32,
    /// Plasticity collaborator to install
    pub plasticity: PlasticityKind,
    /// Row transfer engine
    pub transfer: TransferConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            n_neurons: 256,
            n_synapse_types: 2,
            delay_bits: DEFAULT_DELAY_BITS,
            queue_capacity: DEFAULT_SPIKE_QUEUE_SIZE,
            max_row_words: MAX_ROW_STRIDE as usize,
            input_shifts: vec![0, 0],
            poll_budget: 100_000,
            plasticity: PlasticityKind::Static,
            transfer: TransferConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Create a validated configuration for `n_neurons` neurons and `n_synapse_types` types
    pub fn new(n_neurons: u32, n_synapse_types: u32) -> Result<Self> {
        let config = Self {
            n_neurons,
            n_synapse_types,
            input_shifts: vec![0; n_synapse_types as usize],
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration matching an image's dimensions
    pub fn for_image(meta: &ImageMeta) -> Result<Self> {
        Self::new(meta.n_neurons, meta.n_synapse_types)?.with_delay_bits(meta.delay_bits)
    }

    /// Set the delay field width
    pub fn with_delay_bits(mut self, delay_bits: u32) -> Result<Self> {
        self.delay_bits = delay_bits;
        self.validate()?;
        Ok(self)
    }

    /// Set the ingestion queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Result<Self> {
        self.queue_capacity = capacity;
        self.validate()?;
        Ok(self)
    }

    /// Set the per-type input shifts
    pub fn with_input_shifts(mut self, shifts: Vec<u8>) -> Result<Self> {
        self.input_shifts = shifts;
        self.validate()?;
        Ok(self)
    }

    /// Set the transfer discipline
    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer.mode = mode;
        self
    }

    /// Set the transfer engine timing
    pub fn with_transfer_timing(mut self, setup_cycles: u32, words_per_cycle: u32) -> Self {
        self.transfer.setup_cycles = setup_cycles;
        self.transfer.words_per_cycle = words_per_cycle;
        self
    }

    /// Set the per-tick poll budget
    pub fn with_poll_budget(mut self, budget: u32) -> Self {
        self.poll_budget = budget;
        self
    }

    /// Set the plasticity collaborator
    pub fn with_plasticity(mut self, kind: PlasticityKind) -> Self {
        self.plasticity = kind;
        self
    }

    /// Synapse word layout for this core
    pub fn format(&self) -> Result<SynapseFormat> {
        Ok(SynapseFormat::for_core(
            self.n_neurons,
            self.n_synapse_types,
            self.delay_bits,
        )?)
    }

    /// Check that this configuration agrees with an image's dimensions
    pub fn check_image(&self, meta: &ImageMeta) -> Result<()> {
        if meta.n_neurons != self.n_neurons
            || meta.n_synapse_types != self.n_synapse_types
            || meta.delay_bits != self.delay_bits
        {
            return Err(CoreError::invalid_config(format!(
                "image built for {} neurons / {} types / {} delay bits, core configured for {} / {} / {}",
                meta.n_neurons,
                meta.n_synapse_types,
                meta.delay_bits,
                self.n_neurons,
                self.n_synapse_types,
                self.delay_bits
            )));
        }
        Ok(())
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if self.n_neurons == 0 {
            return Err(CoreError::invalid_parameter("n_neurons", "0", "> 0"));
        }
        if self.n_synapse_types == 0 {
            return Err(CoreError::invalid_parameter("n_synapse_types", "0", "> 0"));
        }
        self.format()?;
        if self.queue_capacity < 2 || !self.queue_capacity.is_power_of_two() {
            return Err(CoreError::invalid_parameter(
                "queue_capacity",
                self.queue_capacity.to_string(),
                "a power of two >= 2",
            ));
        }
        if self.max_row_words < spyke_storage::ROW_HEADER_WORDS {
            return Err(CoreError::invalid_parameter(
                "max_row_words",
                self.max_row_words.to_string(),
                format!(">= {}", spyke_storage::ROW_HEADER_WORDS),
            ));
        }
        if self.input_shifts.len() != self.n_synapse_types as usize {
            return Err(CoreError::invalid_parameter(
                "input_shifts",
                format!("{} entries", self.input_shifts.len()),
                format!("one per synapse type ({})", self.n_synapse_types),
            ));
        }
        if let Some(&shift) = self.input_shifts.iter().find(|&&s| s > 16) {
            return Err(CoreError::invalid_parameter(
                "input_shifts",
                shift.to_string(),
                "<= 16",
            ));
        }
        if self.transfer.words_per_cycle == 0 {
            return Err(CoreError::invalid_parameter(
                "transfer.words_per_cycle",
                "0",
                "> 0",
            ));
        }
        Ok(())
    }
}
