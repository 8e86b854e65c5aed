use crate::channel::{BoundedChannel, Reservation};
use crate::error::Result;
use crate::latch::{CompletionLatch, InFlight};
use crate::metrics::StageMetrics;
use crate::pool::panic_message;
use crate::queue::WorkQueue;
use crate::record::Record;
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// The role a stage plays in the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// No inputs, one output
    Extractor,
    /// One or more inputs, one or more outputs, one result per input item
    Transformer,
    /// One input, one or more outputs, emits only after the input is drained
    Aggregator,
    /// One input, no outputs
    Loader,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Extractor => "extractor",
            StageKind::Transformer => "transformer",
            StageKind::Aggregator => "aggregator",
            StageKind::Loader => "loader",
        };
        f.write_str(name)
    }
}

/// Turns one raw chunk from a source into a pipeline item.
///
/// Runs on a pool worker, so parsing work is spread across the pool while the
/// dispatch thread keeps reading chunks.
pub trait Extract<C, T>: Send + Sync + 'static {
    fn extract(&self, chunk: C) -> Result<T>;
}

impl<C, T, F> Extract<C, T> for F
where
    F: Fn(C) -> Result<T> + Send + Sync + 'static,
{
    fn extract(&self, chunk: C) -> Result<T> {
        self(chunk)
    }
}

/// Combines one argument per input slot into a single output item
pub trait Transform<T>: Send + Sync + 'static {
    /// `args[i]` is the fresh item for the slot that produced it and the
    /// accumulated history for every other slot.
    fn transform(&self, args: &[T]) -> Result<T>;

    /// Per-invocation contribution summed into the stage's running statistics
    fn stats(&self, _args: &[T]) -> Vec<f64> {
        Vec::new()
    }
}

impl<T, F> Transform<T> for F
where
    F: Fn(&[T]) -> Result<T> + Send + Sync + 'static,
{
    fn transform(&self, args: &[T]) -> Result<T> {
        self(args)
    }
}

/// A [`Transform`] assembled from two closures
pub struct WithStats<T, F, S> {
    transform: F,
    stats: S,
    _item: PhantomData<fn(&[T])>,
}

/// Pair a transform closure with a statistics closure
pub fn with_stats<T, F, S>(transform: F, stats: S) -> WithStats<T, F, S>
where
    F: Fn(&[T]) -> Result<T> + Send + Sync + 'static,
    S: Fn(&[T]) -> Vec<f64> + Send + Sync + 'static,
{
    WithStats {
        transform,
        stats,
        _item: PhantomData,
    }
}

impl<T, F, S> Transform<T> for WithStats<T, F, S>
where
    T: 'static,
    F: Fn(&[T]) -> Result<T> + Send + Sync + 'static,
    S: Fn(&[T]) -> Vec<f64> + Send + Sync + 'static,
{
    fn transform(&self, args: &[T]) -> Result<T> {
        (self.transform)(args)
    }

    fn stats(&self, args: &[T]) -> Vec<f64> {
        (self.stats)(args)
    }
}

/// Folds a whole input stream into one accumulator, emitted after the input
/// is exhausted.
pub trait Aggregate<T: Record>: Send + Sync + 'static {
    /// Pre-aggregate one item; runs on a pool worker
    fn partial(&self, item: T) -> Result<T> {
        Ok(item)
    }

    /// Fold a partial result into the accumulator; runs under the accumulator lock
    fn merge(&self, accumulator: &mut T, partial: T) {
        accumulator.append(&partial);
    }

    /// Cut the final accumulator into the batches pushed downstream
    fn split(&self, accumulator: T) -> Vec<T> {
        vec![accumulator]
    }
}

/// Consumes one item at the end of the pipeline
pub trait Load<T>: Send + Sync + 'static {
    fn load(&self, item: T) -> Result<()>;
}

impl<T, F> Load<T> for F
where
    F: Fn(T) -> Result<()> + Send + Sync + 'static,
{
    fn load(&self, item: T) -> Result<()> {
        self(item)
    }
}

/// A failure isolated to a single task or dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: String,
    pub message: String,
}

/// Failures collected across every stage of one run
#[derive(Debug, Default)]
pub(crate) struct FailureLog {
    failures: Mutex<Vec<StageFailure>>,
}

impl FailureLog {
    pub(crate) fn record(&self, stage: &str, message: String) {
        self.failures.lock().push(StageFailure {
            stage: stage.to_string(),
            message,
        });
    }

    pub(crate) fn take(&self) -> Vec<StageFailure> {
        std::mem::take(&mut *self.failures.lock())
    }
}

/// What a dispatch loop needs to hand work to the pool
pub(crate) struct StageContext {
    name: Arc<str>,
    queue: Arc<WorkQueue>,
    in_flight: Arc<InFlight>,
    metrics: StageMetrics,
    failures: Arc<FailureLog>,
    stall_park: Duration,
    rescan: Duration,
}

impl StageContext {
    pub(crate) fn new(
        name: &str,
        queue: Arc<WorkQueue>,
        metrics: StageMetrics,
        failures: Arc<FailureLog>,
        stall_park: Duration,
        rescan: Duration,
    ) -> Self {
        Self {
            name: Arc::from(name),
            queue,
            in_flight: Arc::new(InFlight::new()),
            metrics,
            failures,
            stall_park,
            rescan,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    pub(crate) fn stall_park(&self) -> Duration {
        self.stall_park
    }

    /// Longest a multi-input stage waits on one slot before scanning all again
    pub(crate) fn rescan(&self) -> Duration {
        self.rescan
    }

    /// Queue `work` on the shared work queue.
    ///
    /// Errors and panics from `work` are logged, counted and recorded; they
    /// never reach the worker thread.
    pub(crate) fn submit<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let guard = self.in_flight.enter();
        let name = Arc::clone(&self.name);
        let metrics = self.metrics.clone();
        let failures = Arc::clone(&self.failures);

        self.metrics.record_submitted();
        self.queue.push_task(Box::new(move || {
            let _guard = guard;
            let started = Instant::now();
            let message = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(Ok(())) => {
                    metrics.record_completed(started.elapsed());
                    trace!(stage = %name, "task completed");
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("task panicked: {}", panic_message(payload.as_ref())),
            };
            metrics.record_failed();
            warn!(stage = %name, error = %message, "task failed, item dropped");
            failures.record(&name, message);
        }))
    }

    /// Block until every task this stage submitted has finished
    pub(crate) fn wait_idle(&self) {
        self.in_flight.wait_idle();
    }

    pub(crate) fn record_failure(&self, message: String) {
        warn!(stage = %self.name, error = %message, "stage failed");
        self.failures.record(&self.name, message);
    }
}

/// A stage's driving loop, run on its own dispatch thread
pub(crate) trait Dispatch<T>: Send {
    /// Pull from inputs and submit tasks until there is nothing left to do
    fn dispatch(&mut self, ctx: &StageContext) -> Result<()>;

    fn inputs(&self) -> &[Arc<BoundedChannel<T>>];

    fn outputs(&self) -> &[Arc<BoundedChannel<T>>];
}

/// Run one stage to completion on the calling thread.
///
/// Whatever happens inside the loop, the stage ends the same way: its inputs
/// are drained if the loop bailed out early, its in-flight tasks are awaited,
/// its outputs are marked finished and the latch is counted down.
pub(crate) fn drive<T>(
    mut node: Box<dyn Dispatch<T>>,
    ctx: StageContext,
    latch: Arc<CompletionLatch>,
) where
    T: Send + 'static,
{
    debug!(stage = %ctx.name(), "dispatch loop started");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| node.dispatch(&ctx)));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(format!(
            "dispatch panicked: {}",
            panic_message(payload.as_ref())
        )),
    };

    if let Some(message) = failure {
        ctx.record_failure(message);
        // Upstream producers block on credits until somebody pops.
        for input in node.inputs() {
            while input.pop().is_some() {}
        }
    }

    ctx.wait_idle();
    for output in node.outputs() {
        output.mark_producer_finished();
    }
    debug!(stage = %ctx.name(), "dispatch loop finished");
    latch.count_down();
}

/// Take one credit on every output, blocking while any of them is full
pub(crate) fn reserve_all<T>(outputs: &[Arc<BoundedChannel<T>>]) -> Vec<Reservation<T>> {
    outputs.iter().map(|output| output.reserve()).collect()
}

/// Push `item` through every reservation. Empty items are not forwarded and
/// their credits go back. Returns the number of pushes.
pub(crate) fn emit<T: Record>(mut reservations: Vec<Reservation<T>>, item: T) -> u64 {
    if item.is_empty() {
        return 0;
    }
    let Some(last) = reservations.pop() else {
        return 0;
    };
    let pushes = reservations.len() as u64 + 1;
    for reservation in reservations {
        reservation.push(item.clone());
    }
    last.push(item);
    pushes
}
