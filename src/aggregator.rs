use crate::channel::BoundedChannel;
use crate::error::Result;
use crate::record::Record;
use crate::stage::{emit, reserve_all, Aggregate, Dispatch, StageContext};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Folds its whole input into one accumulator and emits it at the end.
///
/// Partial aggregation runs on the pool; merging happens under the
/// accumulator lock. Nothing is pushed downstream until the input is
/// exhausted and every merge task has finished.
pub(crate) struct AggregatorStage<T> {
    input: Arc<BoundedChannel<T>>,
    outputs: Vec<Arc<BoundedChannel<T>>>,
    aggregate: Arc<dyn Aggregate<T>>,
    accumulator: Arc<Mutex<T>>,
}

impl<T: Record> AggregatorStage<T> {
    pub(crate) fn new(
        input: Arc<BoundedChannel<T>>,
        outputs: Vec<Arc<BoundedChannel<T>>>,
        aggregate: Arc<dyn Aggregate<T>>,
    ) -> Self {
        Self {
            input,
            outputs,
            aggregate,
            accumulator: Arc::new(Mutex::new(T::default())),
        }
    }
}

impl<T: Record> Dispatch<T> for AggregatorStage<T> {
    fn dispatch(&mut self, ctx: &StageContext) -> Result<()> {
        while let Some(item) = self.input.pop() {
            let aggregate = Arc::clone(&self.aggregate);
            let accumulator = Arc::clone(&self.accumulator);
            ctx.submit(move || {
                let partial = aggregate.partial(item)?;
                aggregate.merge(&mut accumulator.lock(), partial);
                Ok(())
            })?;
        }

        ctx.wait_idle();
        let total = std::mem::take(&mut *self.accumulator.lock());
        let batches = self.aggregate.split(total);
        debug!(stage = %ctx.name(), batches = batches.len(), "emitting aggregate");

        let mut emitted = 0;
        for batch in batches.into_iter().filter(|batch| !batch.is_empty()) {
            emitted += emit(reserve_all(&self.outputs), batch);
        }
        ctx.metrics().record_emitted(emitted);
        Ok(())
    }

    fn inputs(&self) -> &[Arc<BoundedChannel<T>>] {
        std::slice::from_ref(&self.input)
    }

    fn outputs(&self) -> &[Arc<BoundedChannel<T>>] {
        &self.outputs
    }
}
