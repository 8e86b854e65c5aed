use crate::error::{PipelineError, Result};
use crate::queue::WorkQueue;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

#[derive(Debug, Default)]
struct PoolState {
    running: bool,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    wake: Condvar,
    queue: Arc<WorkQueue>,
}

/// Fixed set of worker threads executing tasks from a shared [`WorkQueue`].
///
/// Workers are spawned idle and only start dequeuing after [`start`](Self::start).
/// [`shutdown`](Self::shutdown) shuts the queue down and joins every worker;
/// dropping the pool does the same if it has not happened yet.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` idle workers (at least one) named `{name}-worker-{i}`
    pub fn new(size: usize, queue: Arc<WorkQueue>, name: &str) -> Result<Self> {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            wake: Condvar::new(),
            queue,
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(size.max(1)),
        };

        for id in 0..size.max(1) {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{name}-worker-{id}"))
                .spawn(move || worker_loop(id, shared))
                .map_err(|e| PipelineError::ThreadError(e.to_string()))?;
            pool.workers.push(handle);
        }

        debug!(workers = pool.workers.len(), "worker pool spawned");
        Ok(pool)
    }

    /// Let idle workers start taking tasks
    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        if state.running || state.shutdown {
            return;
        }
        state.running = true;
        drop(state);
        self.shared.wake.notify_all();
    }

    /// Stop every worker once it finishes its current task, then join them.
    ///
    /// Pending tasks are discarded. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.wake.notify_all();
        self.shared.queue.shutdown();

        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(PipelineError::ThreadError(format!(
                "{panicked} worker thread(s) panicked"
            )));
        }
        debug!("worker pool stopped");
        Ok(())
    }

    /// Number of live worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn is_running(&self) -> bool {
        let state = self.shared.state.lock();
        state.running && !state.shutdown
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            if let Err(e) = self.shutdown() {
                error!(error = %e, "worker pool teardown failed");
            }
        }
    }
}

fn worker_loop(id: usize, shared: Arc<PoolShared>) {
    {
        let mut state = shared.state.lock();
        while !state.running && !state.shutdown {
            shared.wake.wait(&mut state);
        }
        if state.shutdown {
            trace!(worker = id, "worker exiting before start");
            return;
        }
    }

    trace!(worker = id, "worker active");
    while let Some(task) = shared.queue.pop_task() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(
                worker = id,
                panic = %panic_message(payload.as_ref()),
                "task panicked"
            );
        }
    }
    trace!(worker = id, "worker exiting");
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
