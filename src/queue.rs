use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use tracing::debug;

/// A deferred unit of work owning everything it needs
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

/// Unbounded FIFO of tasks shared by every stage and worker
pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl WorkQueue {
    /// Create an empty, open queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append a task and wake one waiting worker.
    ///
    /// After [`shutdown`](Self::shutdown) the task is dropped unexecuted.
    pub fn push_task(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(PipelineError::QueueShutdown);
        }
        state.tasks.push_back(task);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Take the oldest task, blocking while the queue is empty and open.
    ///
    /// `None` means the queue has been shut down: the caller should exit.
    pub fn pop_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.shutdown {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Stop accepting tasks, discard pending ones and release every waiter
    pub fn shutdown(&self) {
        let discarded = {
            let mut state = self.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.tasks)
        };
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "discarding pending tasks on shutdown");
        }
        // Dropped outside the lock: tasks may own guards that take other locks.
        drop(discarded);
        self.ready.notify_all();
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Whether no task is pending
    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkQueue")
            .field("pending", &state.tasks.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
