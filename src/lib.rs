//! An embeddable ETL pipeline engine with credit-based backpressure.
//!
//! A pipeline is a fixed, acyclic topology of stages connected by bounded
//! channels. Every stage runs a dispatch loop on its own thread and hands the
//! actual work to a shared worker pool, one task per item.
//!
//! # Features
//!
//! - Bounded channels where producers take a credit before every push
//! - Drain detection: a channel is exhausted once its producer has finished,
//!   it is empty and every credit is back
//! - Extractors, transformers (including multi-input joins with history),
//!   aggregators and loaders, with fan-out through separate output slots
//! - Running statistics per transformer and per-stage metrics
//! - Per-task error isolation, collected into a [`RunReport`]
//! - TOML configuration, interval and file-change triggers
//!
//! # Example
//!
//! ```
//! use etl_pipeline::{PipelineBuilder, Result};
//! use std::sync::{Arc, Mutex};
//!
//! fn parse(chunk: u32) -> Result<String> {
//!     Ok(chunk.to_string())
//! }
//!
//! fn label(args: &[String]) -> Result<String> {
//!     Ok(format!("Transformed {}", args[0]))
//! }
//!
//! let mut pipeline = PipelineBuilder::new().workers(2).build::<String>()?;
//! let source = pipeline.add_extractor("source", 2, 0..4u32, parse)?;
//! let raw = pipeline.claim_output(source)?;
//! let labels = pipeline.add_transformer("label", &[raw], 1, 2, label)?;
//! let labelled = pipeline.claim_output(labels)?;
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! pipeline.add_loader("sink", labelled, move |item: String| -> Result<()> {
//!     sink.lock().unwrap().push(item);
//!     Ok(())
//! })?;
//!
//! pipeline.run()?.ensure_success()?;
//! assert_eq!(seen.lock().unwrap().len(), 4);
//! # Ok::<(), etl_pipeline::PipelineError>(())
//! ```

mod aggregator;
pub mod channel;
pub mod config;
pub mod error;
mod extractor;
pub mod latch;
mod loader;
pub mod metrics;
pub mod permit;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod record;
pub mod report;
pub mod source;
pub mod stage;
pub mod stats;
mod transformer;
pub mod trigger;

// Re-exports for convenience
pub use channel::{BoundedChannel, Reservation};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use latch::{CompletionLatch, InFlight, InFlightGuard};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use permit::Permit;
pub use pipeline::{ChannelId, Pipeline, PipelineBuilder, StageId};
pub use pool::WorkerPool;
pub use queue::{Task, WorkQueue};
pub use record::Record;
pub use report::{RunReport, StageReport};
pub use source::LineBatches;
pub use stage::{
    with_stats, Aggregate, Extract, Load, StageFailure, StageKind, Transform, WithStats,
};
pub use stats::RunningStats;
pub use trigger::{FileTrigger, IntervalTrigger};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
