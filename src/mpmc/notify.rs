//! One-shot wakeup registry.
//!
//! Every enqueue swaps the whole set of pending registrations out under a
//! short-held lock and fires each one exactly once. Firing writes into a
//! one-slot channel with `try_send`, so a producer never waits on a slow or
//! vanished watcher.

use crate::trace::trace;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use spin::Mutex;
use std::{
    collections::HashMap,
    mem,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Identifies one registration in a queue's watch registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// The registration was released or its queue dropped before an enqueue happened.
    #[error("signal was released before it fired")]
    Disconnected,
    #[error("timed out waiting for signal")]
    Timeout,
}

/// A one-shot wakeup handed out by [`MsQueue::watch`](crate::MsQueue::watch).
///
/// Fires on the first enqueue after registration and never again.
#[derive(Debug)]
pub struct Signal {
    id: WatchId,
    rx: Receiver<()>,
}

impl Signal {
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Non-blocking check. Returns `true` once, when the fire is observed.
    pub fn is_fired(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Block until the signal fires.
    pub fn wait(self) -> Result<(), SignalError> {
        self.rx.recv().map_err(|_| SignalError::Disconnected)
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<(), SignalError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => SignalError::Timeout,
            RecvTimeoutError::Disconnected => SignalError::Disconnected,
        })
    }

    /// The underlying channel, for use with `crossbeam::select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

pub(crate) struct WatchRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<WatchId, Sender<()>>>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn watch(&self) -> Signal {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = channel::bounded(1);
        self.pending.lock().insert(id, tx);
        Signal { id, rx }
    }

    pub(crate) fn unwatch(&self, id: WatchId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fire and forget every pending registration. Returns how many were fired.
    pub(crate) fn notify(&self) -> usize {
        let fired = mem::take(&mut *self.pending.lock());
        if fired.is_empty() {
            return 0;
        }

        let count = fired.len();
        for (_, tx) in fired {
            // fresh one-slot channel: never full; a dropped Signal is just skipped
            let _ = tx.try_send(());
        }
        trace!(count, "fired watchers");
        count
    }
}
