use etl_pipeline::{
    with_stats, Aggregate, LineBatches, PipelineBuilder, PipelineConfig, PipelineError,
    Result as PipelineResult, StageKind,
};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Collected<T> = Arc<Mutex<Vec<T>>>;

fn collector<T: Send + 'static>(
) -> (Collected<T>, impl Fn(T) -> PipelineResult<()> + Send + Sync + 'static) {
    let seen: Collected<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let load = move |item: T| -> PipelineResult<()> {
        sink.lock().push(item);
        Ok(())
    };
    (seen, load)
}

fn to_text(chunk: u32) -> PipelineResult<String> {
    Ok(chunk.to_string())
}

fn data(chunk: u32) -> PipelineResult<String> {
    Ok(format!("Data {chunk}"))
}

fn prefix(args: &[String]) -> PipelineResult<String> {
    Ok(format!("Transformed {}", args[0]))
}

fn pair(args: &[String]) -> PipelineResult<String> {
    Ok(format!("{}|{}", args[0], args[1]))
}

fn builder(workers: usize) -> PipelineBuilder {
    PipelineBuilder::new().workers(workers)
}

/// Run `body` on its own thread and fail the test if it outlives `limit`
fn within<R: Send + 'static>(limit: Duration, body: impl FnOnce() -> R + Send + 'static) -> R {
    let (done, outcome) = crossbeam::channel::bounded(1);
    thread::spawn(move || {
        let _ = done.send(body());
    });
    outcome
        .recv_timeout(limit)
        .expect("pipeline did not terminate in time")
}

fn run_prefix_pipeline(items: u32, workers: usize) -> Vec<String> {
    let mut pipeline = builder(workers).build::<String>().expect("Pipeline build failed");
    let source = pipeline
        .add_extractor("source", 2, 0..items, data)
        .expect("Extractor setup failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    let label = pipeline
        .add_transformer("label", &[raw], 1, 2, prefix)
        .expect("Transformer setup failed");
    let labelled = pipeline.claim_output(label).expect("Claim failed");
    let (seen, load) = collector::<String>();
    pipeline.add_loader("sink", labelled, load).expect("Loader setup failed");

    let report = pipeline
        .run()
        .expect("Pipeline run failed")
        .ensure_success()
        .expect("Pipeline reported failures");
    assert_eq!(report.stages.len(), 3);

    let mut seen = seen.lock().clone();
    seen.sort();
    seen
}

#[test]
fn test_linear_pipeline() {
    let seen = run_prefix_pipeline(5, 2);
    assert_eq!(
        seen,
        vec![
            "Transformed Data 0",
            "Transformed Data 1",
            "Transformed Data 2",
            "Transformed Data 3",
            "Transformed Data 4"
        ]
    );
}

#[test]
fn test_empty_source_terminates() {
    assert!(run_prefix_pipeline(0, 2).is_empty());
}

#[test]
fn test_item_counts_preserved() {
    for (items, workers) in [(1, 1), (7, 3), (64, 4), (200, 8)] {
        assert_eq!(run_prefix_pipeline(items, workers).len(), items as usize);
    }
}

#[test]
fn test_running_stats_sum() {
    let mut pipeline = builder(4).build::<String>().expect("Pipeline build failed");
    let source = pipeline
        .add_extractor("source", 3, 0..25u32, to_text)
        .expect("Extractor setup failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    let counted = pipeline
        .add_transformer(
            "count",
            &[raw],
            1,
            3,
            with_stats(|args: &[String]| Ok(args[0].clone()), |_: &[String]| vec![1.0]),
        )
        .expect("Transformer setup failed");
    let out = pipeline.claim_output(counted).expect("Claim failed");
    let (_, load) = collector::<String>();
    pipeline.add_loader("sink", out, load).expect("Loader setup failed");

    let live = pipeline.stats(counted).expect("Missing stats");
    let report = pipeline.run().expect("Pipeline run failed");
    assert_eq!(report.stats(counted), Some(&[25.0][..]));
    assert_eq!(live.snapshot(), vec![25.0]);

    let stage = report.stage(counted).expect("Unknown stage");
    assert_eq!(stage.kind, StageKind::Transformer);
    assert_eq!(stage.metrics.completed, 25);
}

#[test]
fn test_two_input_join_uses_history() {
    let mut pipeline = builder(1).build::<String>().expect("Pipeline build failed");
    let flights = pipeline.add_channel(4).expect("Channel setup failed");
    let hotels = pipeline.add_channel(4).expect("Channel setup failed");
    let join = pipeline
        .add_transformer("join", &[flights, hotels], 1, 4, pair)
        .expect("Transformer setup failed");
    let joined = pipeline.claim_output(join).expect("Claim failed");
    let (seen, load) = collector::<String>();
    pipeline.add_loader("sink", joined, load).expect("Loader setup failed");

    let flights = pipeline.channel(flights).expect("Unknown channel");
    let hotels = pipeline.channel(hotels).expect("Unknown channel");
    flights.send("A1".to_string());
    hotels.send("B1".to_string());
    hotels.mark_producer_finished();

    let late = thread::spawn(move || {
        while !hotels.is_exhausted() {
            thread::sleep(Duration::from_millis(1));
        }
        flights.send("A2".to_string());
        flights.mark_producer_finished();
    });

    pipeline
        .run()
        .expect("Pipeline run failed")
        .ensure_success()
        .expect("Pipeline reported failures");
    late.join().expect("Feeder panicked");

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["A1|", "A1|B1", "A2|B1"]);
}

#[test]
fn test_fan_out_delivers_to_every_slot() {
    let mut pipeline = builder(3).build::<String>().expect("Pipeline build failed");
    let source = pipeline
        .add_extractor("source", 2, 0..10u32, to_text)
        .expect("Extractor setup failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    let fan = pipeline
        .add_transformer("fan", &[raw], 2, 2, prefix)
        .expect("Transformer setup failed");
    let left = pipeline.claim_output(fan).expect("Claim failed");
    let right = pipeline.claim_output(fan).expect("Claim failed");
    assert!(matches!(
        pipeline.claim_output(fan),
        Err(PipelineError::OutputSlotsExceeded { declared: 2, .. })
    ));

    let (left_seen, left_load) = collector::<String>();
    let (right_seen, right_load) = collector::<String>();
    pipeline.add_loader("left", left, left_load).expect("Loader setup failed");
    pipeline.add_loader("right", right, right_load).expect("Loader setup failed");

    let report = pipeline.run().expect("Pipeline run failed");
    assert!(report.is_success());
    assert_eq!(left_seen.lock().len(), 10);
    assert_eq!(right_seen.lock().len(), 10);
    assert_eq!(report.stage(fan).expect("Unknown stage").metrics.emitted, 20);
}

fn evens_only(args: &[String]) -> PipelineResult<String> {
    let value: u32 = args[0]
        .parse()
        .map_err(|_| PipelineError::stage("not a number"))?;
    Ok(if value % 2 == 0 { args[0].clone() } else { String::new() })
}

#[test]
fn test_empty_results_not_forwarded() {
    let mut pipeline = builder(2).build::<String>().expect("Pipeline build failed");
    let source = pipeline
        .add_extractor("source", 2, 0..10u32, to_text)
        .expect("Extractor setup failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    let evens = pipeline
        .add_transformer("evens", &[raw], 1, 2, evens_only)
        .expect("Transformer setup failed");
    let out = pipeline.claim_output(evens).expect("Claim failed");
    let (seen, load) = collector::<String>();
    pipeline.add_loader("sink", out, load).expect("Loader setup failed");

    pipeline
        .run()
        .expect("Pipeline run failed")
        .ensure_success()
        .expect("Pipeline reported failures");
    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["0", "2", "4", "6", "8"]);
}

fn reject_two(args: &[String]) -> PipelineResult<String> {
    if args[0] == "2" {
        Err(PipelineError::stage("rejected row 2"))
    } else {
        Ok(args[0].clone())
    }
}

#[test]
fn test_task_failure_is_isolated() {
    let mut pipeline = builder(2).build::<String>().expect("Pipeline build failed");
    let source = pipeline
        .add_extractor("source", 2, 0..5u32, to_text)
        .expect("Extractor setup failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    let checked = pipeline
        .add_transformer("check", &[raw], 1, 2, reject_two)
        .expect("Transformer setup failed");
    let out = pipeline.claim_output(checked).expect("Claim failed");
    let (seen, load) = collector::<String>();
    pipeline.add_loader("sink", out, load).expect("Loader setup failed");

    let report = pipeline.run().expect("Pipeline run failed");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, "check");
    assert_eq!(report.stage(checked).expect("Unknown stage").metrics.failed, 1);
    assert_eq!(seen.lock().len(), 4);

    match report.ensure_success() {
        Err(PipelineError::TaskFailed { stage, count, .. }) => {
            assert_eq!(stage, "check");
            assert_eq!(count, 1);
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

#[test]
fn test_panicking_loader_does_not_hang() {
    let mut pipeline = builder(2).build::<String>().expect("Pipeline build failed");
    let source = pipeline
        .add_extractor("source", 1, 0..6u32, to_text)
        .expect("Extractor setup failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    pipeline
        .add_loader("sink", raw, |item: String| -> PipelineResult<()> {
            if item == "3" {
                panic!("loader blew up");
            }
            Ok(())
        })
        .expect("Loader setup failed");

    let report = pipeline.run().expect("Pipeline run failed");
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].message.contains("loader blew up"));
}

struct Chunks(usize);

impl Aggregate<Vec<u32>> for Chunks {
    fn split(&self, accumulator: Vec<u32>) -> Vec<Vec<u32>> {
        accumulator.chunks(self.0).map(<[u32]>::to_vec).collect()
    }
}

fn singleton(i: u32) -> PipelineResult<Vec<u32>> {
    Ok(vec![i])
}

#[test]
fn test_aggregator_emits_after_drain() {
    let mut pipeline = builder(3).build::<Vec<u32>>().expect("Pipeline build failed");
    let source = pipeline
        .add_extractor("source", 2, 0..10u32, singleton)
        .expect("Extractor setup failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    let totals = pipeline
        .add_aggregator("totals", raw, 1, 2, Chunks(3))
        .expect("Aggregator setup failed");
    let batches = pipeline.claim_output(totals).expect("Claim failed");
    let (seen, load) = collector::<Vec<u32>>();
    pipeline.add_loader("sink", batches, load).expect("Loader setup failed");

    let report = pipeline
        .run()
        .expect("Pipeline run failed")
        .ensure_success()
        .expect("Pipeline reported failures");
    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 4);
    let mut values: Vec<u32> = seen.into_iter().flatten().collect();
    values.sort_unstable();
    assert_eq!(values, (0..10).collect::<Vec<_>>());
    assert_eq!(report.stage(totals).expect("Unknown stage").kind, StageKind::Aggregator);
}

fn read_batch(batch: io::Result<String>) -> PipelineResult<String> {
    Ok(batch?)
}

fn quito_rows(args: &[String]) -> PipelineResult<String> {
    Ok(args[0]
        .lines()
        .filter(|row| row.starts_with("Quito,"))
        .map(|row| format!("{row}\n"))
        .collect())
}

#[test]
fn test_line_batches_feed_extractor() {
    let csv = "city,price\nRio,100\nLima,80\nQuito,60\nBogota,90\nQuito,75\n";
    let batches = LineBatches::from_text(csv, 2).expect("Batching failed");
    assert_eq!(batches.header(), ["city", "price"]);

    let config = PipelineConfig::from_toml_str("workers = 2").expect("Config parse failed");
    let mut pipeline = PipelineBuilder::from_config(config)
        .build::<String>()
        .expect("Pipeline build failed");
    let source = pipeline
        .add_extractor("csv", 2, batches, read_batch)
        .expect("Extractor setup failed");
    let raw = pipeline.claim_output(source).expect("Claim failed");
    let quito = pipeline
        .add_transformer("quito", &[raw], 1, 2, quito_rows)
        .expect("Transformer setup failed");
    let out = pipeline.claim_output(quito).expect("Claim failed");
    let (seen, load) = collector::<String>();
    pipeline.add_loader("sink", out, load).expect("Loader setup failed");

    pipeline
        .run()
        .expect("Pipeline run failed")
        .ensure_success()
        .expect("Pipeline reported failures");
    let mut rows: Vec<String> = seen
        .lock()
        .iter()
        .flat_map(|batch| batch.lines().map(str::to_string))
        .collect();
    rows.sort();
    assert_eq!(rows, vec!["Quito,60", "Quito,75"]);
}

#[test]
fn test_run_errors() {
    let mut empty = builder(1).build::<String>().expect("Pipeline build failed");
    assert!(matches!(empty.run(), Err(PipelineError::NoStages)));

    let mut dangling = builder(1).build::<String>().expect("Pipeline build failed");
    dangling
        .add_extractor("source", 1, 0..1u32, to_text)
        .expect("Extractor setup failed");
    assert!(matches!(
        dangling.run(),
        Err(PipelineError::UnconsumedOutput { slot: 0, .. })
    ));

    let mut done = builder(1).build::<String>().expect("Pipeline build failed");
    let source = done
        .add_extractor("source", 1, 0..1u32, to_text)
        .expect("Extractor setup failed");
    let raw = done.claim_output(source).expect("Claim failed");
    let (_, load) = collector::<String>();
    done.add_loader("sink", raw, load).expect("Loader setup failed");
    done.run().expect("Pipeline run failed");
    assert!(matches!(done.run(), Err(PipelineError::AlreadyStarted)));
}

fn run_joined_chains(items: u32, workers: usize, capacity: usize) -> usize {
    let mut pipeline = PipelineBuilder::new()
        .workers(workers)
        .build::<String>()
        .expect("Pipeline build failed");
    let left = pipeline
        .add_extractor("left", capacity, 0..items, to_text)
        .expect("Extractor setup failed");
    let right = pipeline
        .add_extractor("right", capacity, 0..items, data)
        .expect("Extractor setup failed");
    let left = pipeline.claim_output(left).expect("Claim failed");
    let right = pipeline.claim_output(right).expect("Claim failed");

    let left = pipeline
        .add_transformer("left-label", &[left], 1, capacity, prefix)
        .expect("Transformer setup failed");
    let right = pipeline
        .add_transformer("right-label", &[right], 1, capacity, prefix)
        .expect("Transformer setup failed");
    let left = pipeline.claim_output(left).expect("Claim failed");
    let right = pipeline.claim_output(right).expect("Claim failed");

    let join = pipeline
        .add_transformer("join", &[left, right], 1, capacity, pair)
        .expect("Transformer setup failed");
    let joined = pipeline.claim_output(join).expect("Claim failed");
    let (seen, load) = collector::<String>();
    pipeline.add_loader("sink", joined, load).expect("Loader setup failed");

    pipeline
        .run()
        .expect("Pipeline run failed")
        .ensure_success()
        .expect("Pipeline reported failures");
    let count = seen.lock().len();
    count
}

#[test]
fn test_join_of_transformer_chains_terminates() {
    for (workers, capacity) in [(2, 2), (1, 4), (1, 1), (2, 1), (1, 2), (2, 4)] {
        let items = 300;
        let joined = within(Duration::from_secs(60), move || {
            run_joined_chains(items, workers, capacity)
        });
        assert_eq!(
            joined,
            2 * items as usize,
            "workers={workers} capacity={capacity}"
        );
    }
}

#[test]
fn test_diamond_terminates() {
    let joined = within(Duration::from_secs(60), || {
        let mut pipeline = PipelineBuilder::new()
            .workers(1)
            .build::<String>()
            .expect("Pipeline build failed");
        let source = pipeline
            .add_extractor("source", 1, 0..50u32, to_text)
            .expect("Extractor setup failed");
        let raw = pipeline.claim_output(source).expect("Claim failed");
        let fan = pipeline
            .add_transformer("fan", &[raw], 2, 1, prefix)
            .expect("Transformer setup failed");
        let upper = pipeline.claim_output(fan).expect("Claim failed");
        let lower = pipeline.claim_output(fan).expect("Claim failed");

        let upper = pipeline
            .add_transformer("upper", &[upper], 1, 1, prefix)
            .expect("Transformer setup failed");
        let lower = pipeline
            .add_transformer("lower", &[lower], 1, 1, prefix)
            .expect("Transformer setup failed");
        let upper = pipeline.claim_output(upper).expect("Claim failed");
        let lower = pipeline.claim_output(lower).expect("Claim failed");

        let join = pipeline
            .add_transformer("join", &[upper, lower], 1, 1, pair)
            .expect("Transformer setup failed");
        let joined = pipeline.claim_output(join).expect("Claim failed");
        let (seen, load) = collector::<String>();
        pipeline.add_loader("sink", joined, load).expect("Loader setup failed");

        pipeline
            .run()
            .expect("Pipeline run failed")
            .ensure_success()
            .expect("Pipeline reported failures");
        let count = seen.lock().len();
        count
    });
    assert_eq!(joined, 100);
}
