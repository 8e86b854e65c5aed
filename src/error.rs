use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while assembling or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pipeline has already been run
    #[error("Pipeline has already been started")]
    AlreadyStarted,

    /// No stages registered
    #[error("Cannot start pipeline with no stages")]
    NoStages,

    /// A stage was asked for more output slots than it declared
    #[error("Stage '{stage}' declared {declared} output slot(s), all already claimed")]
    OutputSlotsExceeded { stage: String, declared: usize },

    /// A stage id that this pipeline never handed out
    #[error("Unknown stage id {0}")]
    UnknownStage(usize),

    /// A channel id that this pipeline never handed out
    #[error("Unknown channel id {0}")]
    UnknownChannel(usize),

    /// A channel already feeds another stage
    #[error("Channel {channel} is already consumed by stage '{consumer}'")]
    ChannelAlreadyConsumed { channel: usize, consumer: String },

    /// A stage output slot nobody reads from; it would stall the producer forever
    #[error("Output slot {slot} of stage '{stage}' is not consumed by any stage")]
    UnconsumedOutput { stage: String, slot: usize },

    /// Work queue no longer accepts tasks
    #[error("Work queue has been shut down")]
    QueueShutdown,

    /// A user task returned an error or panicked
    #[error("Stage '{stage}' failed: {message} ({count} failure(s) in total)")]
    TaskFailed {
        stage: String,
        message: String,
        count: usize,
    },

    /// Stage-level error raised by user code
    #[error("Stage execution failed: {0}")]
    StageError(String),

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error from a source or trigger
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Convenience constructor for errors raised by user stage code
    pub fn stage(message: impl Into<String>) -> Self {
        PipelineError::StageError(message.into())
    }
}
