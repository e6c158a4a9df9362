use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use spyke_runtime::{
    Collaborators, CoreConfig, CoreImage, FixedSynapse, ImageMeta, RoutingEntry, RowBuilder,
    RowDescriptor, SpikeEvent, SpikeSchedule, SynapticCore, TransferMode,
};

const META: ImageMeta = ImageMeta {
    n_neurons: 256,
    n_synapse_types: 2,
    delay_bits: 4,
};
const SOURCES: u32 = 64;

fn build_image(fan_out: u32, seed: u64) -> CoreImage {
    let format = META.format().expect("bench format");
    let stride = fan_out + 3;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut words = Vec::new();
    for _ in 0..SOURCES {
        let mut row = RowBuilder::new();
        for _ in 0..fan_out {
            row = row.fixed_synapse(
                FixedSynapse::new(
                    rng.gen_range(1..64),
                    rng.gen_range(1..16),
                    rng.gen_range(0..2),
                    rng.gen_range(0..256),
                ),
                &format,
            );
        }
        words.extend(row.build_padded(stride as usize).expect("bench row"));
    }
    let routing = vec![RoutingEntry::new(
        0,
        !(SOURCES - 1),
        RowDescriptor::row(0, stride).expect("bench descriptor"),
    )];
    CoreImage::new(META, routing, Vec::new(), words).expect("bench image")
}

fn build_schedule(rate: u32, steps: u32, seed: u64) -> SpikeSchedule {
    let mut rng = StdRng::seed_from_u64(seed);
    let events = (0..steps)
        .flat_map(|time| (0..rate).map(move |_| time))
        .map(|time| SpikeEvent {
            time,
            key: rng.gen_range(0..SOURCES),
        })
        .collect();
    SpikeSchedule::new(events)
}

fn bench_timesteps(c: &mut Criterion) {
    let mut group = c.benchmark_group("spyke_timesteps");
    // Short runs to keep benches fast in CI
    let steps = 50;
    let rate = 16;

    for &fan_out in &[8u32, 32u32, 128u32] {
        group.throughput(Throughput::Elements(u64::from(rate * steps * fan_out)));
        let modes = [("async", TransferMode::Async), ("busy_wait", TransferMode::BusyWait)];
        for (label, mode) in modes {
            group.bench_with_input(BenchmarkId::new(label, fan_out), &fan_out, |b, &fan_out| {
                let image = build_image(fan_out, 1234);
                let schedule = build_schedule(rate, steps, 99);
                b.iter_batched(
                    || {
                        let config = CoreConfig::for_image(&image.meta)
                            .expect("bench config")
                            .with_transfer_mode(mode);
                        SynapticCore::from_image(config, image.clone(), Collaborators::default())
                            .expect("bench core")
                    },
                    |(mut core, producer)| {
                        let _reports = core.run(&producer, &schedule, steps).unwrap();
                    },
                    BatchSize::SmallInput,
                );
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_timesteps);
criterion_main!(benches);
