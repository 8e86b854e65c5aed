use crate::error::{PipelineError, Result};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::StageId;
use crate::stage::{StageFailure, StageKind};
use std::time::Duration;

/// Per-stage outcome of a run
#[derive(Debug, Clone)]
pub struct StageReport {
    pub id: StageId,
    pub name: String,
    pub kind: StageKind,
    pub metrics: MetricsSnapshot,
    /// Running statistics totals; empty for stages without statistics
    pub stats: Vec<f64>,
}

/// Outcome of [`Pipeline::run`](crate::Pipeline::run)
#[derive(Debug, Clone)]
pub struct RunReport {
    pub elapsed: Duration,
    pub stages: Vec<StageReport>,
    /// Failures isolated during the run, in the order they happened
    pub failures: Vec<StageFailure>,
}

impl RunReport {
    pub fn stage(&self, id: StageId) -> Option<&StageReport> {
        self.stages.iter().find(|stage| stage.id == id)
    }

    /// Statistics totals of one stage
    pub fn stats(&self, id: StageId) -> Option<&[f64]> {
        self.stage(id).map(|stage| stage.stats.as_slice())
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn isolated failures into an error carrying the first one
    pub fn ensure_success(self) -> Result<Self> {
        match self.failures.first() {
            None => Ok(self),
            Some(first) => Err(PipelineError::TaskFailed {
                stage: first.stage.clone(),
                message: first.message.clone(),
                count: self.failures.len(),
            }),
        }
    }

    /// Get a summary of all stage metrics
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Pipeline finished in {:.2}s with {} failure(s):\n",
            self.elapsed.as_secs_f64(),
            self.failures.len()
        );
        for stage in &self.stages {
            summary.push_str(&format!(
                "  {} {} '{}': {}\n",
                stage.kind,
                stage.id,
                stage.name,
                stage.metrics.format()
            ));
        }
        summary
    }
}
