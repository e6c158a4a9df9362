//! Core image inspection

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use spyke_storage::{decode_fixed_synapse, CoreImage, RoutingEntry, SynapseFormat, SynapticRow};

use crate::error::CliResult;

/// Inspect a core image
#[derive(Args, Debug)]
pub struct InspectCommand {
    /// Image file
    pub image: PathBuf,

    /// Rows to decode per routing entry
    #[arg(long, default_value_t = 0)]
    pub rows: u32,
}

impl InspectCommand {
    pub async fn execute(self) -> CliResult<()> {
        info!("Inspecting {}", self.image.display());
        let image = CoreImage::open(&self.image)?;
        let format = image.format()?;

        println!(
            "neurons: {}  types: {}  delay bits: {}  ring slots: {}",
            image.meta.n_neurons,
            image.meta.n_synapse_types,
            image.meta.delay_bits,
            1u64 << format.ring_bits()
        );
        println!("direct words: {}", image.direct_words.len());
        println!("row words: {}", image.row_words.len());
        println!("routing entries: {}", image.routing.len());

        for (i, entry) in image.routing.iter().enumerate() {
            println!(
                "  [{}] key {:#010x} mask {:#010x} sources {} {:?}",
                i,
                entry.key,
                entry.mask,
                block_size(entry),
                entry.descriptor
            );
            let d = entry.descriptor;
            if d.is_direct() || d.is_empty() {
                continue;
            }
            let shown = u64::from(self.rows).min(block_size(entry));
            for local in 0..shown {
                let start = u64::from(d.base()) + u64::from(d.stride()) * local;
                let end = start + u64::from(d.stride());
                match image.row_words.get(start as usize..end as usize) {
                    Some(words) => print_row(local, words, &format),
                    None => println!("      row {}: beyond row storage", local),
                }
            }
        }

        Ok(())
    }
}

fn block_size(entry: &RoutingEntry) -> u64 {
    u64::from(!entry.mask) + 1
}

fn print_row(local: u64, words: &[u32], format: &SynapseFormat) {
    let row = match SynapticRow::parse(words) {
        Ok(row) => row,
        Err(err) => {
            println!("      row {}: {}", local, err);
            return;
        }
    };
    println!(
        "      row {}: {} plastic words, {} fixed, {} plastic controls",
        local,
        row.plastic_word_count(),
        row.fixed_synapse_count(),
        row.plastic_control_count()
    );
    for &word in row.fixed_words() {
        let s = decode_fixed_synapse(word, format);
        println!(
            "        w {:>5} d {:>2} type {} -> {}",
            s.weight, s.delay, s.synapse_type, s.index
        );
    }
}
