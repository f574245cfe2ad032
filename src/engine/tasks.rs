//! Background task loops.
//!
//! Three cooperative loops run on OS threads next to user operations:
//! periodic fsync of the active datafile (only when not syncing on every
//! write), the rotation check with its doubling interval, and periodic
//! compaction. Each loop sleeps on a shared condvar so `close` can wake
//! and join it promptly instead of waiting out a full interval.
//!
//! Loop errors have no channel back to the caller; they are logged and
//! swallowed.

use std::{
    sync::{Condvar, Mutex},
    thread,
    time::Duration,
};

use tracing::error;

use super::{Engine, EngineError};

/// Upper bound for the rotation-check interval after doubling.
const MAX_TRACK_ACTIVE_INTERVAL: Duration = Duration::from_secs(10 * 60);

// ------------------------------------------------------------------------------------------------
// Shutdown signal
// ------------------------------------------------------------------------------------------------

/// One-way shutdown latch shared between the engine handle and its
/// background threads.
pub(crate) struct Shutdown {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Latches the shutdown flag and wakes every sleeping task.
    pub(crate) fn signal(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(|p| p.into_inner());
        *stopped = true;
        self.signal.notify_all();
    }

    /// Sleeps for `timeout` or until shutdown is signalled, whichever
    /// comes first. Returns whether the engine is shutting down.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(|p| p.into_inner());
        let (stopped, _) = self
            .signal
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(|p| p.into_inner());
        *stopped
    }
}

// ------------------------------------------------------------------------------------------------
// Task loops
// ------------------------------------------------------------------------------------------------

impl Engine {
    /// Spawns the background tasks for a read-write engine.
    pub(crate) fn spawn_tasks(&self) {
        let mut handles = Vec::with_capacity(3);

        if !self.config.sync_on_write {
            let engine = self.clone();
            handles.push(thread::spawn(move || engine.sync_loop()));
        }

        let engine = self.clone();
        handles.push(thread::spawn(move || engine.merge_loop()));

        let engine = self.clone();
        handles.push(thread::spawn(move || engine.track_active_loop()));

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.extend(handles);
    }

    /// Periodically fsyncs the active datafile.
    fn sync_loop(&self) {
        loop {
            if self.shutdown.wait(self.config.sync_interval) {
                return;
            }
            match self.sync() {
                Ok(()) => {}
                Err(EngineError::NotOpen) => return,
                Err(e) => error!(error = %e, "background sync failed"),
            }
        }
    }

    /// Periodically merges the frozen datafiles.
    fn merge_loop(&self) {
        loop {
            if self.shutdown.wait(self.config.merge_interval) {
                return;
            }
            match self.compact() {
                Ok(()) => {}
                Err(EngineError::NotOpen) => return,
                Err(e) => error!(error = %e, "background compaction failed"),
            }
        }
    }

    /// Watches the active datafile size. While no rotation is due the
    /// check interval doubles, capped at ten minutes; a successful
    /// rotation resets it to the configured base.
    fn track_active_loop(&self) {
        let base = self.config.track_active_interval;
        let mut interval = base;

        loop {
            if self.shutdown.wait(interval) {
                return;
            }
            interval = if self.rotate_active() {
                base
            } else {
                (interval * 2).min(MAX_TRACK_ACTIVE_INTERVAL)
            };
        }
    }
}
