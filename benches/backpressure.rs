use criterion::{black_box, criterion_group, criterion_main, Criterion};
use etl_pipeline::{PipelineBuilder, Result};
use std::time::Duration;

fn payload(i: u32) -> Result<Vec<u8>> {
    Ok(vec![i as u8; 64])
}

fn slow(args: &[Vec<u8>]) -> Result<Vec<u8>> {
    std::thread::sleep(Duration::from_micros(100));
    Ok(args[0].clone())
}

fn discard(_: Vec<u8>) -> Result<()> {
    Ok(())
}

/// Fast extractor feeding a slow transformer through a channel of `capacity`
fn run_slow_consumer(capacity: usize) {
    let mut pipeline = PipelineBuilder::new()
        .workers(4)
        .build::<Vec<u8>>()
        .expect("Build failed");
    let source = pipeline
        .add_extractor("producer", capacity, 0..1000u32, payload)
        .expect("Extractor failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    let consumer = pipeline
        .add_transformer("consumer", &[raw], 1, capacity, slow)
        .expect("Transformer failed");
    let out = pipeline.claim_output(consumer).expect("Claim failed");
    pipeline.add_loader("sink", out, discard).expect("Loader failed");

    black_box(pipeline.run().expect("Run failed"));
}

fn benchmark_tight_credits(c: &mut Criterion) {
    c.bench_function("slow_consumer_capacity_4", |b| {
        b.iter(|| run_slow_consumer(4));
    });
}

fn benchmark_loose_credits(c: &mut Criterion) {
    c.bench_function("slow_consumer_capacity_500", |b| {
        b.iter(|| run_slow_consumer(500));
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10).measurement_time(Duration::from_secs(20));
    targets = benchmark_tight_credits, benchmark_loose_credits
);
criterion_main!(benches);
