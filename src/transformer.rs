use crate::channel::BoundedChannel;
use crate::error::Result;
use crate::record::Record;
use crate::stage::{emit, reserve_all, Dispatch, StageContext, Transform};
use crate::stats::RunningStats;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Pulls from one or more inputs and queues one transform task per item.
///
/// With several inputs the stage behaves as a stateful join: every item is
/// appended to its slot's history, and the task receives the fresh item in
/// its own slot and the other slots' history snapshots everywhere else.
///
/// Output credits are taken here, before the task is queued, so a queued task
/// never waits on a channel and the tasks in flight are bounded by the
/// output capacity.
pub(crate) struct TransformerStage<T> {
    inputs: Vec<Arc<BoundedChannel<T>>>,
    outputs: Vec<Arc<BoundedChannel<T>>>,
    transform: Arc<dyn Transform<T>>,
    history: Mutex<Vec<T>>,
    stats: Arc<RunningStats>,
}

impl<T: Record> TransformerStage<T> {
    pub(crate) fn new(
        inputs: Vec<Arc<BoundedChannel<T>>>,
        outputs: Vec<Arc<BoundedChannel<T>>>,
        transform: Arc<dyn Transform<T>>,
        stats: Arc<RunningStats>,
    ) -> Self {
        let history = if inputs.len() > 1 {
            vec![T::default(); inputs.len()]
        } else {
            Vec::new()
        };
        Self {
            inputs,
            outputs,
            transform,
            history: Mutex::new(history),
            stats,
        }
    }

    fn outputs_have_room(&self) -> bool {
        self.outputs.iter().all(|output| output.free_permits() > 0)
    }

    fn inputs_open(&self) -> bool {
        self.inputs.iter().any(|input| !input.is_exhausted())
    }

    /// Next item and the slot it came from.
    ///
    /// Slots are tried without blocking in index order. If all are empty the
    /// stage waits on the first slot that is not exhausted, for at most
    /// `rescan`, then scans every slot again.
    fn next_input(&self, rescan: Duration) -> Option<(usize, T)> {
        if let [input] = self.inputs.as_slice() {
            return input.pop().map(|item| (0, item));
        }

        loop {
            for (slot, input) in self.inputs.iter().enumerate() {
                if let Some(item) = input.try_pop() {
                    return Some((slot, item));
                }
            }

            let (slot, input) = self
                .inputs
                .iter()
                .enumerate()
                .find(|(_, input)| !input.is_exhausted())?;
            if let Some(item) = input.pop_timeout(rescan) {
                return Some((slot, item));
            }
        }
    }

    /// Build one argument per input slot around the fresh item
    fn arguments(&self, slot: usize, item: T) -> Vec<T> {
        if self.inputs.len() == 1 {
            return vec![item];
        }

        let mut history = self.history.lock();
        history[slot].append(&item);

        let mut fresh = Some(item);
        history
            .iter()
            .enumerate()
            .map(|(index, past)| {
                if index == slot {
                    fresh.take().unwrap_or_default()
                } else {
                    past.clone()
                }
            })
            .collect()
    }
}

impl<T: Record> Dispatch<T> for TransformerStage<T> {
    fn dispatch(&mut self, ctx: &StageContext) -> Result<()> {
        let backoff = Backoff::new();
        let mut stalled = false;

        while self.inputs_open() {
            if !self.outputs_have_room() {
                if !stalled {
                    ctx.metrics().record_stall();
                    trace!(stage = %ctx.name(), "outputs saturated, stalling");
                    stalled = true;
                }
                if backoff.is_completed() {
                    thread::park_timeout(ctx.stall_park());
                } else {
                    backoff.snooze();
                }
                continue;
            }
            stalled = false;
            backoff.reset();

            let Some((slot, item)) = self.next_input(ctx.rescan()) else {
                continue;
            };
            // This stage is the only producer on its outputs, so after the
            // room check these credits are available without waiting.
            let reservations = reserve_all(&self.outputs);
            let args = self.arguments(slot, item);

            let transform = Arc::clone(&self.transform);
            let stats = Arc::clone(&self.stats);
            let metrics = ctx.metrics().clone();

            ctx.submit(move || {
                stats.accumulate(&transform.stats(&args));
                let item = transform.transform(&args)?;
                metrics.record_emitted(emit(reservations, item));
                Ok(())
            })?;
        }
        Ok(())
    }

    fn inputs(&self) -> &[Arc<BoundedChannel<T>>] {
        &self.inputs
    }

    fn outputs(&self) -> &[Arc<BoundedChannel<T>>] {
        &self.outputs
    }
}
