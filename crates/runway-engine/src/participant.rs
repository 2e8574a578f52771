//! Dedicated threads that take part in the tick barrier.
//!
//! [`ParticipantThread::spawn`] registers with the clock on the caller's
//! thread, so the tick that is current when `spawn` returns already waits
//! for the new participant. The thread then runs its work closure once per
//! tick until the clock stops or the thread is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use runway_core::ClockReading;
use tracing::{debug, error};

use crate::clock::SimClock;
use crate::config::ConfigError;

/// Handle to a tick-participant thread.
///
/// Dropping the handle stops and joins the thread.
#[derive(Debug)]
pub struct ParticipantThread {
    name: String,
    clock: Arc<SimClock>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ParticipantThread {
    /// Register with `clock` and spawn a thread named `runway-{name}` that
    /// calls `work` once per admitted tick.
    ///
    /// Completion is reported after `work` returns. If `work` panics the
    /// thread's registration is released so the barrier keeps moving.
    pub fn spawn<F>(clock: &Arc<SimClock>, name: &str, mut work: F) -> Result<Self, ConfigError>
    where
        F: FnMut(ClockReading) + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut participant = clock.join_with_cancel(name, Arc::clone(&cancel));
        let thread_name = format!("runway-{name}");
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Some(reading) = participant.next_tick() {
                    work(reading);
                    participant.complete();
                }
                debug!(participant = participant.name(), "participant exiting");
            })
            .map_err(|e| ConfigError::spawn(&thread_name, e))?;
        Ok(Self {
            name: name.to_string(),
            clock: Arc::clone(clock),
            cancel,
            handle: Some(handle),
        })
    }

    /// Participant name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` until the thread has exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the thread, wake it if it is waiting for a tick, and join it.
    ///
    /// Idempotent. Returns `false` if the thread had panicked.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        self.cancel.store(true, Ordering::Release);
        self.clock.interrupt();
        if handle.thread().id() == thread::current().id() {
            return true;
        }
        match handle.join() {
            Ok(()) => true,
            Err(_) => {
                error!(participant = %self.name, "participant thread panicked");
                false
            }
        }
    }
}

impl Drop for ParticipantThread {
    fn drop(&mut self) {
        self.stop();
    }
}
