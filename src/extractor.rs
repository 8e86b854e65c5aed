use crate::channel::BoundedChannel;
use crate::error::Result;
use crate::record::Record;
use crate::stage::{Dispatch, Extract, StageContext};
use std::sync::Arc;

/// Reads chunks from a source and turns each one into an item on the pool.
///
/// A credit on the output is taken before the task is queued, so the number
/// of chunks being parsed plus items resident downstream never exceeds the
/// output capacity.
pub(crate) struct ExtractorStage<C, T> {
    chunks: Box<dyn Iterator<Item = C> + Send>,
    extract: Arc<dyn Extract<C, T>>,
    output: Arc<BoundedChannel<T>>,
}

impl<C, T> ExtractorStage<C, T> {
    pub(crate) fn new(
        chunks: Box<dyn Iterator<Item = C> + Send>,
        extract: Arc<dyn Extract<C, T>>,
        output: Arc<BoundedChannel<T>>,
    ) -> Self {
        Self {
            chunks,
            extract,
            output,
        }
    }
}

impl<C, T> Dispatch<T> for ExtractorStage<C, T>
where
    C: Send + 'static,
    T: Record,
{
    fn dispatch(&mut self, ctx: &StageContext) -> Result<()> {
        for chunk in self.chunks.by_ref() {
            let reservation = self.output.reserve();
            let extract = Arc::clone(&self.extract);
            let metrics = ctx.metrics().clone();

            ctx.submit(move || {
                let item = extract.extract(chunk)?;
                // An unused reservation hands its credit back on drop.
                if !item.is_empty() {
                    reservation.push(item);
                    metrics.record_emitted(1);
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn inputs(&self) -> &[Arc<BoundedChannel<T>>] {
        &[]
    }

    fn outputs(&self) -> &[Arc<BoundedChannel<T>>] {
        std::slice::from_ref(&self.output)
    }
}
