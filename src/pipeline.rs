use crate::aggregator::AggregatorStage;
use crate::channel::BoundedChannel;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::extractor::ExtractorStage;
use crate::latch::{CompletionLatch, StartGate};
use crate::loader::LoaderStage;
use crate::metrics::StageMetrics;
use crate::pool::WorkerPool;
use crate::queue::WorkQueue;
use crate::record::Record;
use crate::report::{RunReport, StageReport};
use crate::stage::{
    drive, Aggregate, Dispatch, Extract, FailureLog, Load, StageContext, StageKind, Transform,
};
use crate::stats::RunningStats;
use crate::transformer::TransformerStage;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// How often `run` reports stages still in progress
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to a stage registered in a [`Pipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a channel owned by a [`Pipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(usize);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}", self.0)
    }
}

/// Builder for [`Pipeline`] runtime settings
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one loaded from TOML
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Number of pool worker threads
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Prefix for worker and dispatch thread names
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Park interval for transformers waiting on saturated outputs
    pub fn stall_park(mut self, park: Duration) -> Self {
        self.config.stall_park_micros = park.as_micros() as u64;
        self
    }

    /// Longest wait on one empty join slot before every slot is scanned again
    pub fn join_rescan(mut self, rescan: Duration) -> Self {
        self.config.join_rescan_micros = rescan.as_micros() as u64;
        self
    }

    /// Validate the settings and create an empty pipeline
    pub fn build<T: Record>(self) -> Result<Pipeline<T>> {
        self.config.validate()?;
        Ok(Pipeline {
            config: self.config,
            channels: Vec::new(),
            stages: Vec::new(),
            started: false,
        })
    }
}

struct ChannelSlot<T> {
    channel: Arc<BoundedChannel<T>>,
    consumer: Option<StageId>,
}

struct StageSlot<T> {
    name: String,
    kind: StageKind,
    node: Option<Box<dyn Dispatch<T>>>,
    outputs: Vec<ChannelId>,
    claimed: usize,
    stats: Option<Arc<RunningStats>>,
    metrics: StageMetrics,
}

/// A fixed topology of stages connected by bounded channels.
///
/// Stages are registered one at a time. A stage can only read channels that
/// already exist, so the graph is acyclic by construction. Every channel has
/// at most one consuming stage; fan-out goes through separate output slots,
/// handed out by [`claim_output`](Self::claim_output).
///
/// [`run`](Self::run) executes the whole graph on a fixed worker pool and
/// returns once every stage has finished.
pub struct Pipeline<T: Record> {
    config: PipelineConfig,
    channels: Vec<ChannelSlot<T>>,
    stages: Vec<StageSlot<T>>,
    started: bool,
}

impl<T: Record> Pipeline<T> {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Create a channel fed from outside the pipeline.
    ///
    /// The caller owns the producer side: push through
    /// [`BoundedChannel::send`] and call
    /// [`BoundedChannel::mark_producer_finished`] when done.
    pub fn add_channel(&mut self, capacity: usize) -> Result<ChannelId> {
        self.ensure_open()?;
        check_capacity(capacity)?;
        Ok(self.push_channel(capacity))
    }

    /// The channel behind a handle
    pub fn channel(&self, id: ChannelId) -> Option<Arc<BoundedChannel<T>>> {
        self.channels
            .get(id.0)
            .map(|slot| Arc::clone(&slot.channel))
    }

    /// Register an extractor reading `chunks` and turning each into an item.
    /// Its single output slot holds `capacity` items.
    pub fn add_extractor<C, I, E>(
        &mut self,
        name: impl Into<String>,
        capacity: usize,
        chunks: I,
        extract: E,
    ) -> Result<StageId>
    where
        C: Send + 'static,
        I: IntoIterator<Item = C>,
        I::IntoIter: Send + 'static,
        E: Extract<C, T>,
    {
        let name = name.into();
        self.ensure_open()?;
        check_name(&name)?;
        check_capacity(capacity)?;

        let id = StageId(self.stages.len());
        let (output_ids, mut outputs) = self.create_outputs(1, capacity);
        let node = ExtractorStage::new(
            Box::new(chunks.into_iter()),
            Arc::new(extract),
            outputs.remove(0),
        );
        self.push_stage(name, StageKind::Extractor, Box::new(node), output_ids, None);
        Ok(id)
    }

    /// Register a transformer reading `inputs` (slot order is pull priority)
    /// and writing to `outputs` output slots of `capacity` items each.
    pub fn add_transformer<F>(
        &mut self,
        name: impl Into<String>,
        inputs: &[ChannelId],
        outputs: usize,
        capacity: usize,
        transform: F,
    ) -> Result<StageId>
    where
        F: Transform<T>,
    {
        let name = name.into();
        self.ensure_open()?;
        check_name(&name)?;
        check_capacity(capacity)?;
        check_outputs(&name, outputs)?;
        if inputs.is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "transformer '{name}' needs at least one input"
            )));
        }

        let id = StageId(self.stages.len());
        let input_channels = self.bind_inputs(id, &name, inputs)?;
        let (output_ids, output_channels) = self.create_outputs(outputs, capacity);
        let stats = Arc::new(RunningStats::new());
        let node = TransformerStage::new(
            input_channels,
            output_channels,
            Arc::new(transform),
            Arc::clone(&stats),
        );
        self.push_stage(
            name,
            StageKind::Transformer,
            Box::new(node),
            output_ids,
            Some(stats),
        );
        Ok(id)
    }

    /// Register an aggregator folding `input` and emitting the result to
    /// `outputs` output slots of `capacity` items each.
    pub fn add_aggregator<A>(
        &mut self,
        name: impl Into<String>,
        input: ChannelId,
        outputs: usize,
        capacity: usize,
        aggregate: A,
    ) -> Result<StageId>
    where
        A: Aggregate<T>,
    {
        let name = name.into();
        self.ensure_open()?;
        check_name(&name)?;
        check_capacity(capacity)?;
        check_outputs(&name, outputs)?;

        let id = StageId(self.stages.len());
        let mut inputs = self.bind_inputs(id, &name, &[input])?;
        let (output_ids, output_channels) = self.create_outputs(outputs, capacity);
        let node = AggregatorStage::new(inputs.remove(0), output_channels, Arc::new(aggregate));
        self.push_stage(name, StageKind::Aggregator, Box::new(node), output_ids, None);
        Ok(id)
    }

    /// Register a loader consuming every item of `input`
    pub fn add_loader<L>(
        &mut self,
        name: impl Into<String>,
        input: ChannelId,
        load: L,
    ) -> Result<StageId>
    where
        L: Load<T>,
    {
        let name = name.into();
        self.ensure_open()?;
        check_name(&name)?;

        let id = StageId(self.stages.len());
        let mut inputs = self.bind_inputs(id, &name, &[input])?;
        let node = LoaderStage::new(inputs.remove(0), Arc::new(load));
        self.push_stage(name, StageKind::Loader, Box::new(node), Vec::new(), None);
        Ok(id)
    }

    /// Hand out the next unclaimed output slot of `stage`.
    ///
    /// Fails with [`PipelineError::OutputSlotsExceeded`] once every declared
    /// slot has been claimed.
    pub fn claim_output(&mut self, stage: StageId) -> Result<ChannelId> {
        self.ensure_open()?;
        let slot = self
            .stages
            .get_mut(stage.0)
            .ok_or(PipelineError::UnknownStage(stage.0))?;
        let Some(&channel) = slot.outputs.get(slot.claimed) else {
            error!(stage = %slot.name, declared = slot.outputs.len(), "output slots exceeded");
            return Err(PipelineError::OutputSlotsExceeded {
                stage: slot.name.clone(),
                declared: slot.outputs.len(),
            });
        };
        slot.claimed += 1;
        Ok(channel)
    }

    /// Live running statistics of a transformer, readable during and after a run
    pub fn stats(&self, stage: StageId) -> Option<Arc<RunningStats>> {
        self.stages.get(stage.0)?.stats.clone()
    }

    /// Live metrics of a stage
    pub fn metrics(&self, stage: StageId) -> Option<StageMetrics> {
        self.stages.get(stage.0).map(|slot| slot.metrics.clone())
    }

    pub fn stage_name(&self, stage: StageId) -> Option<&str> {
        self.stages.get(stage.0).map(|slot| slot.name.as_str())
    }

    pub fn stage_kind(&self, stage: StageId) -> Option<StageKind> {
        self.stages.get(stage.0).map(|slot| slot.kind)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Run every stage to completion.
    ///
    /// Spawns the worker pool and one dispatch thread per stage, waits until
    /// every stage has drained its inputs, finished its tasks and closed its
    /// outputs, then stops the pool and joins every thread. Task failures are
    /// isolated and listed in the report; see [`RunReport::ensure_success`].
    pub fn run(&mut self) -> Result<RunReport> {
        if self.started {
            return Err(PipelineError::AlreadyStarted);
        }
        if self.stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        self.validate_outputs()?;
        self.started = true;

        let started_at = Instant::now();
        info!(
            stages = self.stages.len(),
            channels = self.channels.len(),
            workers = self.config.workers,
            "pipeline starting"
        );

        let queue = Arc::new(WorkQueue::new());
        let failures = Arc::new(FailureLog::default());
        let latch = Arc::new(CompletionLatch::new(self.stages.len()));

        let mut pool = WorkerPool::new(
            self.config.workers,
            Arc::clone(&queue),
            &self.config.thread_name,
        )?;

        // Dispatch threads hold at the gate until all of them exist, so a
        // failed spawn never leaves a stage running without its neighbours.
        let gate = Arc::new(StartGate::new());
        let mut dispatchers = Vec::with_capacity(self.stages.len());
        let mut spawn_error = None;
        for stage in &mut self.stages {
            let Some(node) = stage.node.take() else {
                latch.count_down();
                continue;
            };
            let ctx = StageContext::new(
                &stage.name,
                Arc::clone(&queue),
                stage.metrics.clone(),
                Arc::clone(&failures),
                self.config.stall_park(),
                self.config.join_rescan(),
            );
            let latch = Arc::clone(&latch);
            let gate = Arc::clone(&gate);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.config.thread_name, stage.name))
                .spawn(move || {
                    if gate.wait() {
                        drive(node, ctx, latch);
                    }
                });
            match spawned {
                Ok(handle) => dispatchers.push(handle),
                Err(e) => {
                    error!(stage = %stage.name, error = %e, "dispatch thread spawn failed");
                    spawn_error = Some(PipelineError::ThreadError(e.to_string()));
                    break;
                }
            }
        }

        if let Some(e) = spawn_error {
            gate.open(false);
            for handle in dispatchers {
                // Aborted dispatchers return without touching their stage.
                let _ = handle.join();
            }
            pool.shutdown()?;
            return Err(e);
        }

        pool.start();
        gate.open(true);

        while !latch.wait_timeout(PROGRESS_INTERVAL) {
            debug!(remaining = latch.remaining(), "waiting for stages to finish");
        }
        pool.shutdown()?;

        let mut panicked = 0;
        for handle in dispatchers {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(PipelineError::ThreadError(format!(
                "{panicked} dispatch thread(s) panicked"
            )));
        }

        let report = RunReport {
            elapsed: started_at.elapsed(),
            stages: self
                .stages
                .iter()
                .enumerate()
                .map(|(index, stage)| StageReport {
                    id: StageId(index),
                    name: stage.name.clone(),
                    kind: stage.kind,
                    metrics: stage.metrics.snapshot(),
                    stats: stage
                        .stats
                        .as_ref()
                        .map(|stats| stats.snapshot())
                        .unwrap_or_default(),
                })
                .collect(),
            failures: failures.take(),
        };

        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            failures = report.failures.len(),
            "pipeline finished"
        );
        Ok(report)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.started {
            Err(PipelineError::AlreadyStarted)
        } else {
            Ok(())
        }
    }

    fn push_channel(&mut self, capacity: usize) -> ChannelId {
        let id = ChannelId(self.channels.len());
        self.channels.push(ChannelSlot {
            channel: Arc::new(BoundedChannel::new(capacity)),
            consumer: None,
        });
        id
    }

    fn create_outputs(
        &mut self,
        count: usize,
        capacity: usize,
    ) -> (Vec<ChannelId>, Vec<Arc<BoundedChannel<T>>>) {
        (0..count)
            .map(|_| {
                let id = self.push_channel(capacity);
                (id, Arc::clone(&self.channels[id.0].channel))
            })
            .unzip()
    }

    /// Check every input first, then record `consumer` on all of them, so a
    /// failed registration leaves the topology untouched.
    fn bind_inputs(
        &mut self,
        consumer: StageId,
        name: &str,
        inputs: &[ChannelId],
    ) -> Result<Vec<Arc<BoundedChannel<T>>>> {
        for (position, id) in inputs.iter().enumerate() {
            let slot = self
                .channels
                .get(id.0)
                .ok_or(PipelineError::UnknownChannel(id.0))?;
            if let Some(existing) = slot.consumer {
                return Err(PipelineError::ChannelAlreadyConsumed {
                    channel: id.0,
                    consumer: self.stages[existing.0].name.clone(),
                });
            }
            if inputs[..position].contains(id) {
                return Err(PipelineError::ChannelAlreadyConsumed {
                    channel: id.0,
                    consumer: name.to_string(),
                });
            }
        }

        Ok(inputs
            .iter()
            .map(|id| {
                let slot = &mut self.channels[id.0];
                slot.consumer = Some(consumer);
                Arc::clone(&slot.channel)
            })
            .collect())
    }

    fn push_stage(
        &mut self,
        name: String,
        kind: StageKind,
        node: Box<dyn Dispatch<T>>,
        outputs: Vec<ChannelId>,
        stats: Option<Arc<RunningStats>>,
    ) {
        self.stages.push(StageSlot {
            name,
            kind,
            node: Some(node),
            outputs,
            claimed: 0,
            stats,
            metrics: StageMetrics::new(),
        });
    }

    /// Every stage output must feed some stage, or its producer stalls forever
    fn validate_outputs(&self) -> Result<()> {
        for stage in &self.stages {
            for (slot, id) in stage.outputs.iter().enumerate() {
                if self.channels[id.0].consumer.is_none() {
                    return Err(PipelineError::UnconsumedOutput {
                        stage: stage.name.clone(),
                        slot,
                    });
                }
            }
        }
        Ok(())
    }
}

impl<T: Record> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("stages", &self.stages.len())
            .field("channels", &self.channels.len())
            .field("started", &self.started)
            .finish()
    }
}

/// Stage names become thread names, which cannot hold NUL bytes
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(PipelineError::ConfigError(format!(
            "invalid stage name {name:?}: must be non-empty and free of NUL bytes"
        )));
    }
    Ok(())
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(PipelineError::ConfigError(
            "channel capacity must be at least 1".into(),
        ));
    }
    Ok(())
}

fn check_outputs(stage: &str, outputs: usize) -> Result<()> {
    if outputs == 0 {
        return Err(PipelineError::ConfigError(format!(
            "stage '{stage}' needs at least one output slot"
        )));
    }
    Ok(())
}
