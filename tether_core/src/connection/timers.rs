//! Purpose-keyed cancelable timers.
//!
//! Each connection owns one registry; starting a timer for a purpose
//! cancels any timer already outstanding for that same purpose.
//! `stop`/`abort` cancel everything, which is what prevents already
//! scheduled continuations from firing after teardown.

use std::{collections::HashMap, future::Future, time::Duration};

use async_lock::Mutex;
use futures::channel::oneshot;
use tokio::task::JoinHandle;

/// What a timer is for. One slot exists per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    /// Window given to a reconnect request before declaring success.
    ReconnectDelay,
    /// Watchdog that force-stops a connection stuck in reconnecting.
    DisconnectTimeout,
    /// Pause between a failed request and the next retry.
    ErrorDelay,
}

/// Per-connection table of cancelable deferred tasks.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    slots: Mutex<HashMap<TimerPurpose, JoinHandle<()>>>,
}

impl TimerRegistry {
    /// Run `task` after `delay`, replacing (and canceling) any timer
    /// already registered for `purpose`.
    pub fn schedule<F>(&self, purpose: TimerPurpose, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let mut slots = self.slots.lock_blocking();
        if let Some(old) = slots.insert(purpose, handle) {
            old.abort();
        }
    }

    /// A cancelable sleep: resolves `Ok` after `delay`, `Err` if the
    /// purpose slot is canceled first.
    pub fn delay(&self, purpose: TimerPurpose, delay: Duration) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.schedule(purpose, delay, async move {
            let _ = tx.send(());
        });
        rx
    }

    /// Cancel the timer for `purpose`, if any.
    pub fn cancel(&self, purpose: TimerPurpose) {
        if let Some(handle) = self.slots.lock_blocking().remove(&purpose) {
            handle.abort();
        }
    }

    /// Cancel every outstanding timer.
    pub fn cancel_all(&self) {
        for (_, handle) in self.slots.lock_blocking().drain() {
            handle.abort();
        }
    }
}
