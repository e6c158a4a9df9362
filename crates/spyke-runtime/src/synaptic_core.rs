//! Synaptic core context and timestep loop
//!
//! A core owns everything spike processing touches. It has three entry
//! points, mirroring the three execution contexts of the hardware:
//!
//! * [`SynapticCore::drain_spikes`] is the deferred task scheduled on spike arrival
//! * [`SynapticCore::on_transfer_complete`] is the transfer-complete interrupt
//! * [`SynapticCore::timer_tick`] closes the current timestep
//!
//! Spike arrival itself happens on the [`SpikeProducer`] returned by
//! [`SynapticCore::new`].

use spyke_lockfree::{spike_channel, SpikeConsumer, SpikeKey, SpikeProducer};
use spyke_storage::CoreImage;

use crate::config::CoreConfig;
use crate::error::*;
use crate::neuron::{NeuronUpdate, Passive};
use crate::pipeline::{RowFetchPipeline, SpikeContext};
use crate::plasticity::PlasticityHandler;
use crate::provenance::Provenance;
use crate::ring_buffer::{InputConverter, RingBuffer, SynapticInputs};
use crate::routing::RoutingTable;
use crate::structural::{NoRewiring, StructuralPlasticity};
use crate::transfer::{AnyTransfer, MemoryRowStore, RowStore, RowTransfer};

/// The pluggable stages around the synaptic pipeline
pub struct Collaborators {
    /// Handles plastic rows and post-synaptic events
    pub plasticity: Box<dyn PlasticityHandler>,
    /// Consumes synaptic input each timestep
    pub neurons: Box<dyn NeuronUpdate>,
    /// Rewires the routing table between timesteps
    pub structural: Box<dyn StructuralPlasticity>,
}

impl Collaborators {
    /// Collaborators with no rewiring
    pub fn new(plasticity: Box<dyn PlasticityHandler>, neurons: Box<dyn NeuronUpdate>) -> Self {
        Self {
            plasticity,
            neurons,
            structural: Box::new(NoRewiring),
        }
    }

    /// Collaborators chosen by `config`, with the given neuron stage
    pub fn from_config(config: &CoreConfig, neurons: Box<dyn NeuronUpdate>) -> Self {
        Self::new(config.plasticity.build(), neurons)
    }

    /// Replace the structural plasticity stage
    pub fn with_structural(mut self, structural: Box<dyn StructuralPlasticity>) -> Self {
        self.structural = structural;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new(Box::new(crate::plasticity::StaticSynapses), Box::new(Passive))
    }
}

impl core::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collaborators")
            .field("plasticity", &self.plasticity.name())
            .finish_non_exhaustive()
    }
}

/// What one timer tick did
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimestepReport {
    /// Timestep that was opened (inputs belong to it)
    pub time: u32,
    /// Local neurons reported fired by the neuron stage
    pub fired: Vec<u32>,
    /// Sum of raw inputs handed to the neuron stage
    pub input_total: u64,
    /// Engine cycles spent since the previous tick
    pub transfer_cycles: u64,
    /// Polls the tick needed to finish outstanding work
    pub drain_polls: u32,
}

/// One spike arrival in a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpikeEvent {
    /// Timestep during which the spike arrives
    pub time: u32,
    /// Routing key of the spike
    pub key: u32,
}

/// Spike arrivals sorted by timestep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpikeSchedule {
    events: Vec<SpikeEvent>,
}

impl SpikeSchedule {
    /// Sort `events` by time, keeping arrival order within a timestep
    pub fn new(mut events: Vec<SpikeEvent>) -> Self {
        events.sort_by_key(|e| e.time);
        Self { events }
    }

    /// Arrivals during `time`
    pub fn at(&self, time: u32) -> &[SpikeEvent] {
        let start = self.events.partition_point(|e| e.time < time);
        let end = self.events.partition_point(|e| e.time <= time);
        &self.events[start..end]
    }

    /// All arrivals
    pub fn events(&self) -> &[SpikeEvent] {
        &self.events
    }

    /// Number of arrivals
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when there are no arrivals
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A synaptic processing core over transfer engine `T`
#[derive(Debug)]
pub struct SynapticCore<T> {
    config: CoreConfig,
    consumer: SpikeConsumer,
    routing: RoutingTable,
    direct_words: Vec<u32>,
    pipeline: RowFetchPipeline<T>,
    ring: RingBuffer,
    converter: InputConverter,
    inputs: SynapticInputs,
    collaborators: Collaborators,
    fired: Vec<u32>,
    time: u32,
    timesteps: u64,
    cycles_at_tick: u64,
}

impl SynapticCore<AnyTransfer<MemoryRowStore>> {
    /// Build a core from a loaded image, with the engine selected by `config`
    pub fn from_image(
        config: CoreConfig,
        image: CoreImage,
        collaborators: Collaborators,
    ) -> Result<(Self, SpikeProducer)> {
        config.check_image(&image.meta)?;
        let routing = RoutingTable::new(image.routing)?;
        let store = MemoryRowStore::new(image.row_words);
        let transfer = AnyTransfer::from_config(store, &config.transfer);
        Self::new(config, routing, image.direct_words, transfer, collaborators)
    }
}

impl<T: RowTransfer> SynapticCore<T> {
    /// Allocate every fixed-size structure and return the core with its spike producer
    pub fn new(
        config: CoreConfig,
        routing: RoutingTable,
        direct_words: Vec<u32>,
        transfer: T,
        collaborators: Collaborators,
    ) -> Result<(Self, SpikeProducer)> {
        config.validate()?;
        let format = config.format()?;
        let ring = RingBuffer::new(format)?;
        let converter = InputConverter::new(config.input_shifts.clone())?;
        let inputs =
            SynapticInputs::new(config.n_synapse_types as usize, config.n_neurons as usize)?;
        let pipeline = RowFetchPipeline::new(transfer, config.max_row_words)?;
        let (producer, consumer) = spike_channel(config.queue_capacity)?;
        let mut fired = try_alloc("fired list", config.n_neurons as usize, 0u32)?;
        fired.clear();

        log::info!(
            "synaptic core ready: {} neurons, {} types, ring period {}, {} routing entries, {} direct words, {} row words, plasticity {}",
            config.n_neurons,
            config.n_synapse_types,
            format.max_delay() + 1,
            routing.len(),
            direct_words.len(),
            pipeline.transfer().store().len_words(),
            collaborators.plasticity.name()
        );

        let cycles_at_tick = pipeline.transfer().cycles();
        let core = Self {
            config,
            consumer,
            routing,
            direct_words,
            pipeline,
            ring,
            converter,
            inputs,
            collaborators,
            fired,
            time: 0,
            timesteps: 0,
            cycles_at_tick,
        };
        Ok((core, producer))
    }

    fn split(&mut self) -> (&mut RowFetchPipeline<T>, SpikeContext<'_>) {
        let ctx = SpikeContext {
            consumer: &self.consumer,
            routing: &self.routing,
            direct_words: &self.direct_words,
            ring: &mut self.ring,
            plasticity: self.collaborators.plasticity.as_mut(),
            time: self.time,
        };
        (&mut self.pipeline, ctx)
    }

    /// Deferred drain task, run after spikes arrive
    pub fn drain_spikes(&mut self) -> Result<()> {
        let (pipeline, mut ctx) = self.split();
        pipeline.drain(&mut ctx)
    }

    /// Transfer-complete interrupt: one engine cycle of progress
    ///
    /// Returns true when a row finished and was processed.
    pub fn on_transfer_complete(&mut self) -> Result<bool> {
        let (pipeline, mut ctx) = self.split();
        pipeline.poll(&mut ctx)
    }

    /// True when no spike is queued and no transfer is outstanding
    pub fn is_settled(&self) -> bool {
        self.consumer.is_empty() && self.pipeline.is_quiescent()
    }

    /// Close the current timestep and open the next one
    ///
    /// Outstanding spikes and transfers are finished first, spending at most
    /// `poll_budget` engine cycles. If work remains after that the step has
    /// overrun, which is fatal: contributions would land in the wrong slot.
    pub fn timer_tick(&mut self) -> Result<TimestepReport> {
        let mut polls = 0u32;
        loop {
            {
                let (pipeline, mut ctx) = self.split();
                pipeline.pump(&mut ctx)?;
            }
            if self.is_settled() {
                break;
            }
            if polls >= self.config.poll_budget {
                let err = CoreError::TimestepOverrun {
                    time: self.time,
                    pending_spikes: self.consumer.len(),
                    transfers_in_flight: self.pipeline.transfer().reads_in_flight(),
                };
                log::error!("{}", err);
                return Err(err);
            }
            polls += 1;
            self.on_transfer_complete()?;
        }

        self.time = self.time.wrapping_add(1);
        self.collaborators.structural.rewire(self.time, &mut self.routing)?;

        self.ring.drain_timestep(self.time, &self.converter, &mut self.inputs);
        self.fired.clear();
        self.collaborators
            .neurons
            .update(self.time, &self.inputs, &mut self.fired);
        for &neuron in &self.fired {
            self.collaborators
                .plasticity
                .process_post_synaptic_event(self.time, neuron);
        }
        self.timesteps += 1;

        let cycles = self.pipeline.transfer().cycles();
        let report = TimestepReport {
            time: self.time,
            fired: self.fired.clone(),
            input_total: self.inputs.total_raw(),
            transfer_cycles: cycles - self.cycles_at_tick,
            drain_polls: polls,
        };
        self.cycles_at_tick = cycles;
        log::trace!(
            "t={} input {} fired {} polls {}",
            report.time,
            report.input_total,
            report.fired.len(),
            polls
        );
        Ok(report)
    }

    /// Run `steps` timesteps, injecting `schedule` through `producer`
    ///
    /// Each arrival schedules the drain task and lets one engine cycle pass.
    pub fn run(
        &mut self,
        producer: &SpikeProducer,
        schedule: &SpikeSchedule,
        steps: u32,
    ) -> Result<Vec<TimestepReport>> {
        let mut reports = Vec::with_capacity(steps as usize);
        for _ in 0..steps {
            for event in schedule.at(self.time) {
                producer.push(SpikeKey(event.key));
                self.drain_spikes()?;
                self.on_transfer_complete()?;
            }
            reports.push(self.timer_tick()?);
        }
        Ok(reports)
    }

    /// Timestep currently being ingested
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Inputs handed to the neuron stage at the last tick
    pub fn inputs(&self) -> &SynapticInputs {
        &self.inputs
    }

    /// Neurons fired at the last tick
    pub fn fired(&self) -> &[u32] {
        &self.fired
    }

    /// Routing table
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Delay ring buffer
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Row fetch pipeline
    pub fn pipeline(&self) -> &RowFetchPipeline<T> {
        &self.pipeline
    }

    /// Configuration the core was built with
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn provenance(&self) -> Provenance {
        let transfer = self.pipeline.transfer();
        Provenance::collect(
            self.consumer.counters(),
            self.pipeline.counters(),
            &self.ring,
            self.timesteps,
            transfer.cycles(),
            transfer.max_transfer_cycles(),
        )
    }

    /// Take back the transfer engine (and with it the row storage)
    pub fn into_transfer(self) -> T {
        self.pipeline.into_transfer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferMode;
    use crate::neuron::EchoThreshold;
    use spyke_storage::{FixedSynapse, ImageMeta, RoutingEntry, RowBuilder, RowDescriptor};

    fn image() -> CoreImage {
        let meta = ImageMeta {
            n_neurons: 8,
            n_synapse_types: 2,
            delay_bits: 4,
        };
        let f = meta.format().unwrap();
        let mut rows = Vec::new();
        for pre in 0..4u16 {
            rows.extend(
                RowBuilder::new()
                    .fixed_synapse(FixedSynapse::new(100, 1, 0, pre), &f)
                    .fixed_synapse(FixedSynapse::new(50, 2, 1, pre + 4), &f)
                    .build_padded(8)
                    .unwrap(),
            );
        }
        CoreImage::new(
            meta,
            vec![RoutingEntry::new(0x40, 0xFFFF_FFFC, RowDescriptor::row(0, 8).unwrap())],
            vec![],
            rows,
        )
        .unwrap()
    }

    fn core(mode: TransferMode) -> (SynapticCore<AnyTransfer<MemoryRowStore>>, SpikeProducer) {
        let img = image();
        let config = CoreConfig::for_image(&img.meta).unwrap().with_transfer_mode(mode);
        SynapticCore::from_image(config, img, Collaborators::default()).unwrap()
    }

    #[test]
    fn test_delays_land_in_later_steps() {
        let (mut core, producer) = core(TransferMode::Async);
        producer.push(SpikeKey(0x41));
        core.drain_spikes().unwrap();

        let r1 = core.timer_tick().unwrap();
        assert_eq!(r1.time, 1);
        assert_eq!(r1.input_total, 100);
        assert_eq!(core.inputs().raw(0, 1), 100);
        assert!(r1.transfer_cycles > 0);

        let r2 = core.timer_tick().unwrap();
        assert_eq!(r2.time, 2);
        assert_eq!(core.inputs().raw(1, 5), 50);

        let r3 = core.timer_tick().unwrap();
        assert_eq!(r3.input_total, 0);
        assert_eq!(core.provenance().timesteps, 3);
    }

    #[test]
    fn test_overrun_is_fatal() {
        let img = image();
        let config = CoreConfig::for_image(&img.meta)
            .unwrap()
            .with_transfer_mode(TransferMode::Async)
            .with_poll_budget(1);
        let (mut core, producer) =
            SynapticCore::from_image(config, img, Collaborators::default()).unwrap();
        producer.push(SpikeKey(0x40));
        producer.push(SpikeKey(0x42));
        let err = core.timer_tick().unwrap_err();
        assert!(matches!(err, CoreError::TimestepOverrun { time: 0, .. }));
        assert!(err.is_runtime_fatal());
    }

    #[test]
    fn test_mismatched_image_rejected() {
        let img = image();
        let config = CoreConfig::new(16, 2).unwrap();
        assert!(SynapticCore::from_image(config, img, Collaborators::default()).is_err());
    }

    #[test]
    fn test_run_schedule_and_echo() {
        let img = image();
        let config = CoreConfig::for_image(&img.meta).unwrap();
        let collaborators = Collaborators::new(
            config.plasticity.build(),
            Box::new(EchoThreshold::new(200)),
        );
        let (mut core, producer) = SynapticCore::from_image(config, img, collaborators).unwrap();
        let schedule = SpikeSchedule::new(vec![
            SpikeEvent { time: 1, key: 0x43 },
            SpikeEvent { time: 0, key: 0x43 },
            SpikeEvent { time: 0, key: 0x43 },
        ]);
        assert_eq!(schedule.at(0).len(), 2);

        let reports = core.run(&producer, &schedule, 4).unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].fired, vec![3]);
        assert_eq!(reports[0].input_total, 200);
        assert_eq!(reports[1].input_total, 100 + 100);
        assert!(reports[1].fired.is_empty());
        assert_eq!(core.provenance().spikes_processed, 3);
    }

    #[test]
    fn test_schedule_lookup() {
        let s = SpikeSchedule::new(vec![
            SpikeEvent { time: 5, key: 1 },
            SpikeEvent { time: 2, key: 2 },
            SpikeEvent { time: 5, key: 3 },
        ]);
        assert!(s.at(0).is_empty());
        assert_eq!(s.at(2), &[SpikeEvent { time: 2, key: 2 }]);
        assert_eq!(s.at(5).iter().map(|e| e.key).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(s.len(), 3);
    }
}
