use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Countdown latch released when every participant has reported done
#[derive(Debug)]
pub struct CompletionLatch {
    remaining: Mutex<usize>,
    done: Condvar,
}

impl CompletionLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        }
    }

    /// Report one participant done. Extra calls past zero are ignored.
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    /// Block until the count reaches zero
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.done.wait(&mut remaining);
        }
    }

    /// Block until the count reaches zero or `timeout` elapses.
    /// Returns true if the latch was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut remaining = self.remaining.lock();
        let deadline = Instant::now() + timeout;
        while *remaining > 0 {
            if self.done.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }

    /// Participants that have not reported done yet
    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }
}

/// One-shot gate that holds threads until it opens with a verdict
#[derive(Debug, Default)]
pub struct StartGate {
    verdict: Mutex<Option<bool>>,
    opened: Condvar,
}

impl StartGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every waiter with `go`. Later calls keep the first verdict.
    pub fn open(&self, go: bool) {
        let mut verdict = self.verdict.lock();
        if verdict.is_none() {
            *verdict = Some(go);
            self.opened.notify_all();
        }
    }

    /// Block until the gate opens; true means proceed
    pub fn wait(&self) -> bool {
        let mut verdict = self.verdict.lock();
        loop {
            if let Some(go) = *verdict {
                return go;
            }
            self.opened.wait(&mut verdict);
        }
    }
}

/// Counts tasks a stage has submitted that have not finished running.
///
/// Each submission holds an [`InFlightGuard`]; the count drops when the guard
/// does, whether the task ran, failed, panicked or was discarded unexecuted.
#[derive(Debug, Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one in-flight task
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Block until no task is in flight
    pub fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    fn leave(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Held by a submitted task for as long as it exists
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.leave();
    }
}
