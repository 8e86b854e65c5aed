//! Background triggers that re-run a pipeline on a schedule or on file change.

use crate::error::{PipelineError, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Stop signal plus the thread it controls
#[derive(Debug)]
struct TriggerThread {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TriggerThread {
    fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop, stopped) = bounded(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(stopped))
            .map_err(|e| PipelineError::ThreadError(e.to_string()))?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        // Dropping the sender disconnects the receiver and wakes the thread.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("trigger thread panicked");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

/// Wait `timeout` for a stop signal; true when the trigger should exit
fn should_stop(stopped: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(stopped.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

/// Runs a closure periodically on its own thread.
///
/// The interval is measured from the start of each run; a run that takes
/// longer than the interval is followed immediately by the next one.
#[derive(Debug)]
pub struct IntervalTrigger {
    thread: TriggerThread,
}

impl IntervalTrigger {
    pub fn start<F>(interval: Duration, mut action: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        info!(interval_ms = interval.as_millis() as u64, "interval trigger started");
        let thread = TriggerThread::spawn("etl-interval-trigger", move |stopped| loop {
            let started = Instant::now();
            action();
            let remaining = interval.saturating_sub(started.elapsed());
            if should_stop(&stopped, remaining) {
                debug!("interval trigger stopped");
                break;
            }
        })?;
        Ok(Self { thread })
    }

    /// Stop and join the trigger thread. A run in progress completes first.
    pub fn stop(&mut self) {
        self.thread.stop();
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs a closure whenever a file's modification time changes
#[derive(Debug)]
pub struct FileTrigger {
    path: PathBuf,
    thread: TriggerThread,
}

impl FileTrigger {
    /// Start polling `path` every `poll`. Fails if the file does not exist.
    pub fn start<F>(path: impl AsRef<Path>, poll: Duration, mut action: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let mut last_modified = modified(&path)?;
        info!(path = %path.display(), "file trigger started");

        let watched = path.clone();
        let thread = TriggerThread::spawn("etl-file-trigger", move |stopped| {
            while !should_stop(&stopped, poll) {
                match modified(&watched) {
                    Ok(current) if current != last_modified => {
                        last_modified = current;
                        info!(path = %watched.display(), "change detected");
                        action();
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(path = %watched.display(), error = %e, "watched file unavailable");
                    }
                }
            }
            debug!(path = %watched.display(), "file trigger stopped");
        })?;
        Ok(Self { path, thread })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stop(&mut self) {
        self.thread.stop();
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }
}

impl Drop for FileTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    Ok(fs::metadata(path)?.modified()?)
}
