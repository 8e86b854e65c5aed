use crate::channel::BoundedChannel;
use crate::error::Result;
use crate::record::Record;
use crate::stage::{Dispatch, Load, StageContext};
use std::sync::Arc;

/// Drains its input, queuing one consume task per item
pub(crate) struct LoaderStage<T> {
    input: Arc<BoundedChannel<T>>,
    load: Arc<dyn Load<T>>,
}

impl<T> LoaderStage<T> {
    pub(crate) fn new(input: Arc<BoundedChannel<T>>, load: Arc<dyn Load<T>>) -> Self {
        Self { input, load }
    }
}

impl<T: Record> Dispatch<T> for LoaderStage<T> {
    fn dispatch(&mut self, ctx: &StageContext) -> Result<()> {
        while let Some(item) = self.input.pop() {
            let load = Arc::clone(&self.load);
            ctx.submit(move || load.load(item))?;
        }
        Ok(())
    }

    fn inputs(&self) -> &[Arc<BoundedChannel<T>>] {
        std::slice::from_ref(&self.input)
    }

    fn outputs(&self) -> &[Arc<BoundedChannel<T>>] {
        &[]
    }
}
