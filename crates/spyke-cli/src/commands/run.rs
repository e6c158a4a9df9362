//! Run a core image over a spike schedule
//!
//! Example:
//!   spyke run core.spkc --spikes spikes.json --steps 200 --mode busy-wait --output report.json
//!
//! Flags override the configuration file, which overrides the built-in
//! defaults. Dimensions always come from the image.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use spyke_runtime::{
    Collaborators, EchoThreshold, NeuronUpdate, Passive, PlasticityKind, Provenance,
    SpikeSchedule, SynapticCore, TimestepReport, TransferMode,
};
use spyke_storage::CoreImage;

use crate::config::CliConfig;
use crate::error::CliResult;
use crate::schedule;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModeArg {
    /// Double-buffered, completion-driven row fetch
    Async,
    /// Fetch and decode inline
    BusyWait,
}

impl From<ModeArg> for TransferMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Async => TransferMode::Async,
            ModeArg::BusyWait => TransferMode::BusyWait,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PlasticityArg {
    /// Fixed synapses only
    Static,
    /// Halfword weights in the plastic region, never updated
    Frozen,
    /// Halfword weights that decay on use and are written back
    Decay,
}

impl From<PlasticityArg> for PlasticityKind {
    fn from(kind: PlasticityArg) -> Self {
        match kind {
            PlasticityArg::Static => PlasticityKind::Static,
            PlasticityArg::Frozen => PlasticityKind::Frozen,
            PlasticityArg::Decay => PlasticityKind::Decay,
        }
    }
}

/// Run a core image over a spike schedule
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Image file
    pub image: PathBuf,

    /// Spike schedule (JSON); no spikes if omitted
    #[arg(short, long)]
    pub spikes: Option<PathBuf>,

    /// Timesteps to simulate
    #[arg(long)]
    pub steps: Option<u32>,

    /// Row transfer discipline
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Plasticity rule
    #[arg(long, value_enum)]
    pub plasticity: Option<PlasticityArg>,

    /// Engine cycles the timer tick may spend finishing a timestep
    #[arg(long)]
    pub poll_budget: Option<u32>,

    /// Report neurons whose summed input reaches this value as fired
    #[arg(long)]
    pub echo_threshold: Option<u32>,

    /// Write a JSON report here
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Non-zero input to one neuron in one timestep
#[derive(Debug, Clone, Serialize)]
pub struct InputRecord {
    pub synapse_type: usize,
    pub neuron: usize,
    pub raw: u16,
}

/// One closed timestep with its non-zero inputs
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    #[serde(flatten)]
    pub report: TimestepReport,
    pub inputs: Vec<InputRecord>,
}

/// Everything `spyke run --output` writes
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: TransferMode,
    pub plasticity: PlasticityKind,
    pub steps: Vec<StepRecord>,
    pub provenance: Provenance,
}

impl RunCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> CliResult<()> {
        let cli_config = CliConfig::resolve(config.as_deref())?;
        let image = CoreImage::open(&self.image)?;

        let mut core_config = cli_config.core_for_image(&image.meta);
        if let Some(mode) = self.mode {
            core_config = core_config.with_transfer_mode(mode.into());
        }
        if let Some(kind) = self.plasticity {
            core_config = core_config.with_plasticity(kind.into());
        }
        if let Some(budget) = self.poll_budget {
            core_config = core_config.with_poll_budget(budget);
        }
        let steps = self.steps.unwrap_or(cli_config.run.steps);
        let threshold = self.echo_threshold.or(cli_config.run.echo_threshold);

        let schedule = match &self.spikes {
            Some(path) => schedule::load(path)?,
            None => SpikeSchedule::new(Vec::new()),
        };
        let late = schedule.events().iter().filter(|e| e.time >= steps).count();
        if late > 0 {
            warn!("{} scheduled spikes fall after timestep {} and will not be sent", late, steps);
        }

        let neurons: Box<dyn NeuronUpdate> = match threshold {
            Some(t) => Box::new(EchoThreshold::new(t)),
            None => Box::new(Passive),
        };
        let mode = core_config.transfer.mode;
        let plasticity = core_config.plasticity;
        let collaborators = Collaborators::from_config(&core_config, neurons);
        let (mut core, producer) = SynapticCore::from_image(core_config, image, collaborators)?;

        info!(
            "Running {} steps, {} spikes, mode {:?}, plasticity {}",
            steps,
            schedule.len(),
            mode,
            plasticity.as_str()
        );

        let mut records = Vec::with_capacity(steps as usize);
        for _ in 0..steps {
            for report in core.run(&producer, &schedule, 1)? {
                let inputs = core
                    .inputs()
                    .nonzero()
                    .map(|(synapse_type, neuron, raw)| InputRecord {
                        synapse_type,
                        neuron,
                        raw,
                    })
                    .collect();
                records.push(StepRecord { report, inputs });
            }
        }

        let provenance = core.provenance();
        provenance.log_summary();
        let fired: usize = records.iter().map(|r| r.report.fired.len()).sum();
        println!(
            "steps {} spikes {} fired {} rows {} saturations {} cycles {}",
            records.len(),
            provenance.spikes_processed,
            fired,
            provenance.rows_fetched,
            provenance.saturations,
            provenance.transfer_cycles
        );

        if let Some(path) = &self.output {
            let report = RunReport {
                mode,
                plasticity,
                steps: records,
                provenance,
            };
            std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
            info!("Wrote report to {}", path.display());
        }

        Ok(())
    }
}
