//! Random core image generation
//!
//! Example:
//!   spyke generate --out core.spkc --neurons 256 --sources 64 --fan-out 16 --spikes spikes.json
//!
//! Layout of the generated image:
//! - Source `s` has routing key `s` under one prefix-mask entry covering every
//!   source; its row sits at word `s * stride` of row storage.
//! - Direct sources, if any, use keys from [`DIRECT_KEY_BASE`] and address the
//!   direct word array from offset 0.
//! - Rows with `--plastic` synapses carry their weights as halfwords in the
//!   plastic region, matching the frozen-weights rule.

use std::path::PathBuf;

use clap::Args;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;

use spyke_runtime::SpikeEvent;
use spyke_storage::synapse::DEFAULT_DELAY_BITS;
use spyke_storage::{
    encode_fixed_synapse, CoreImage, FixedSynapse, ImageMeta, RoutingEntry, RowBuilder,
    RowDescriptor, SynapseFormat,
};

use crate::error::{CliError, CliResult};
use crate::schedule;

/// First routing key used for direct sources
pub const DIRECT_KEY_BASE: u32 = 0x0001_0000;

/// Widest delay field a synapse delay of one byte can fill
pub const MAX_DELAY_BITS: u32 = u8::BITS;

/// Generate a random core image
#[derive(Args, Debug)]
pub struct GenerateCommand {
    /// Output image path
    #[arg(short, long)]
    pub out: PathBuf,

    /// Neurons on the core
    #[arg(long, default_value_t = 256)]
    pub neurons: u32,

    /// Synapse types per neuron
    #[arg(long, default_value_t = 2)]
    pub types: u32,

    /// Width of the delay field
    #[arg(long, default_value_t = DEFAULT_DELAY_BITS)]
    pub delay_bits: u32,

    /// Sources with a synaptic row
    #[arg(long, default_value_t = 64)]
    pub sources: u32,

    /// Fixed synapses per row
    #[arg(long, default_value_t = 16)]
    pub fan_out: u32,

    /// Plastic synapses per row
    #[arg(long, default_value_t = 0)]
    pub plastic: u32,

    /// Sources with a single direct synapse
    #[arg(long, default_value_t = 0)]
    pub direct: u32,

    /// Largest synaptic weight
    #[arg(long, default_value_t = 256)]
    pub max_weight: u16,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Also write a random spike schedule here
    #[arg(long)]
    pub spikes: Option<PathBuf>,

    /// Timesteps covered by the schedule
    #[arg(long, default_value_t = 100)]
    pub steps: u32,

    /// Spikes per timestep in the schedule
    #[arg(long, default_value_t = 8)]
    pub rate: u32,
}

impl GenerateCommand {
    pub async fn execute(self) -> CliResult<()> {
        self.validate()?;
        let meta = ImageMeta {
            n_neurons: self.neurons,
            n_synapse_types: self.types,
            delay_bits: self.delay_bits,
        };
        let format = meta.format()?;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let rows: Vec<RowBuilder> = (0..self.sources)
            .map(|_| self.random_row(&mut rng, &format))
            .collect();
        let stride = rows.iter().map(RowBuilder::word_len).max().unwrap_or(0) as u32;
        let mut row_words = Vec::with_capacity(rows.len() * stride as usize);
        for row in &rows {
            row_words.extend(row.build_padded(stride as usize)?);
        }

        let mut routing = vec![RoutingEntry::new(
            0,
            block_mask(self.sources),
            RowDescriptor::row(0, stride)?,
        )];
        let mut direct_words = Vec::with_capacity(self.direct as usize);
        if self.direct > 0 {
            routing.push(RoutingEntry::new(
                DIRECT_KEY_BASE,
                block_mask(self.direct),
                RowDescriptor::direct(0)?,
            ));
            for _ in 0..self.direct {
                let synapse = self.random_synapse(&mut rng, &format);
                direct_words.push(encode_fixed_synapse(&synapse, &format));
            }
        }

        let image = CoreImage::new(meta, routing, direct_words, row_words)?;
        image.write_to(&self.out)?;
        info!(
            "Wrote {}: {} sources, stride {}, {} direct, {} row words",
            self.out.display(),
            self.sources,
            stride,
            self.direct,
            image.row_words.len()
        );

        if let Some(path) = &self.spikes {
            let records = self.random_schedule(&mut rng)?;
            schedule::save(path, &records)?;
            info!("Wrote {} spikes to {}", records.len(), path.display());
        }

        println!("{}", self.out.display());
        Ok(())
    }

    fn validate(&self) -> CliResult<()> {
        if self.sources == 0 || self.neurons == 0 || self.types == 0 {
            return Err(CliError::invalid_args(
                "--sources, --neurons and --types must be at least 1",
            ));
        }
        if self.sources > DIRECT_KEY_BASE || self.direct > DIRECT_KEY_BASE {
            return Err(CliError::invalid_args(format!(
                "at most {} sources and {} direct sources",
                DIRECT_KEY_BASE, DIRECT_KEY_BASE
            )));
        }
        if self.max_weight == 0 {
            return Err(CliError::invalid_args("--max-weight must be at least 1"));
        }
        if self.delay_bits == 0 || self.delay_bits > MAX_DELAY_BITS {
            return Err(CliError::invalid_args(format!(
                "--delay-bits must be between 1 and {}",
                MAX_DELAY_BITS
            )));
        }
        self.schedule_len()?;
        Ok(())
    }

    fn schedule_len(&self) -> CliResult<usize> {
        self.steps
            .checked_mul(self.rate)
            .map(|n| n as usize)
            .ok_or_else(|| CliError::invalid_args("--steps times --rate overflows"))
    }

    fn random_synapse(&self, rng: &mut StdRng, format: &SynapseFormat) -> FixedSynapse {
        FixedSynapse::new(
            rng.gen_range(1..=self.max_weight),
            rng.gen_range(1..=format.max_delay()) as u8,
            rng.gen_range(0..self.types) as u8,
            rng.gen_range(0..self.neurons) as u16,
        )
    }

    fn random_row(&self, rng: &mut StdRng, format: &SynapseFormat) -> RowBuilder {
        let mut row = RowBuilder::new();
        for _ in 0..self.fan_out {
            row = row.fixed_synapse(self.random_synapse(rng, format), format);
        }
        if self.plastic > 0 {
            let mut weights = Vec::with_capacity(self.plastic as usize);
            for _ in 0..self.plastic {
                let synapse = self.random_synapse(rng, format);
                weights.push(synapse.weight);
                row = row.plastic_control(synapse, format);
            }
            let plastic: Vec<u32> = weights
                .chunks(2)
                .map(|pair| u32::from(pair[0]) | pair.get(1).map_or(0, |&hi| u32::from(hi) << 16))
                .collect();
            row = row.plastic_words(&plastic);
        }
        row
    }

    fn random_schedule(&self, rng: &mut StdRng) -> CliResult<Vec<SpikeEvent>> {
        let mut records = Vec::with_capacity(self.schedule_len()?);
        for time in 0..self.steps {
            for _ in 0..self.rate {
                let pick = rng.gen_range(0..self.sources + self.direct);
                let key = if pick < self.sources {
                    pick
                } else {
                    DIRECT_KEY_BASE + (pick - self.sources)
                };
                records.push(SpikeEvent { time, key });
            }
        }
        Ok(records)
    }
}

/// Smallest prefix mask whose block covers `n` consecutive keys
fn block_mask(n: u32) -> u32 {
    let width = n.next_power_of_two().trailing_zeros();
    u32::MAX.checked_shl(width).unwrap_or(0)
}
