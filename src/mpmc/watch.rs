//! Blocking "wait, then drain" consumer.
//!
//! A [`WatchIterator`] keeps one registration alive in its queue's watch
//! registry. Each cycle drains everything currently linked; when the drain
//! comes back empty it parks on either the wakeup signal or its quit
//! channel, whichever arrives first.

use crate::mpmc::{MsQueue, Signal};
use crate::trace::debug;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use std::{collections::VecDeque, fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("watch iterator was cancelled")]
    Cancelled,
}

/// Cancels a [`WatchIterator`] from any thread.
///
/// Cancelling wakes an iterator that is currently parked. Extra calls are
/// no-ops.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    quit: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // one-slot channel; a second cancel finds it full, which is fine
        let _ = self.quit.try_send(());
    }
}

/// Blocking consumer built by [`MsQueue::watch_iter`].
///
/// Every call to [`next_batch`](Self::next_batch) returns all values that
/// could be dequeued at that point, blocking first if there are none. As an
/// [`Iterator`] it yields those values one by one and ends after
/// cancellation.
pub struct WatchIterator<T> {
    queue: Arc<MsQueue<T>>,
    signal: Option<Signal>,
    quit_tx: Sender<()>,
    quit_rx: Receiver<()>,
    buffered: VecDeque<T>,
    cancelled: bool,
}

impl<T> MsQueue<T> {
    pub fn watch_iter(self: &Arc<Self>) -> WatchIterator<T> {
        let (quit_tx, quit_rx) = channel::bounded(1);
        WatchIterator {
            queue: Arc::clone(self),
            signal: None,
            quit_tx,
            quit_rx,
            buffered: VecDeque::new(),
            cancelled: false,
        }
    }
}

impl<T> WatchIterator<T> {
    /// Block until at least one value is available, then drain the queue.
    ///
    /// Fails with [`WatchError::Cancelled`] once the iterator has been
    /// cancelled, including while this call is parked.
    pub fn next_batch(&mut self) -> Result<Vec<T>, WatchError> {
        loop {
            if self.cancelled || self.quit_rx.try_recv().is_ok() {
                self.shutdown();
                return Err(WatchError::Cancelled);
            }

            // Register before draining: an enqueue that lands after the
            // drain below is then guaranteed to fire this signal.
            let signal = match self.signal.take() {
                Some(signal) => signal,
                None => self.queue.watch(),
            };

            let batch: Vec<T> = self.queue.drain().collect();
            if !batch.is_empty() {
                self.signal = Some(signal);
                return Ok(batch);
            }

            // Fired (or released): either way the registration is gone, so
            // the next cycle re-registers and drains. Another consumer may
            // have taken the values, in which case we simply park again.
            let quit = select! {
                recv(signal.receiver()) -> _ => false,
                recv(self.quit_rx) -> _ => true,
            };
            if quit {
                self.signal = Some(signal);
                self.shutdown();
                return Err(WatchError::Cancelled);
            }
        }
    }

    /// Stop the iterator. A parked `next_batch` returns immediately.
    pub fn cancel(&self) {
        let _ = self.quit_tx.try_send(());
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { quit: self.quit_tx.clone() }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn shutdown(&mut self) {
        if !self.cancelled {
            debug!("watch iterator cancelled");
            self.cancelled = true;
        }
        self.release();
    }

    fn release(&mut self) {
        if let Some(signal) = self.signal.take() {
            if self.queue.unwatch(&signal) {
                debug!("watch registration released");
            }
        }
    }
}

impl<T> Iterator for WatchIterator<T> {
    type Item = T;

    /// Blocks while the queue is empty. Values already pulled into the
    /// local buffer are still yielded after cancellation.
    fn next(&mut self) -> Option<T> {
        if let Some(item) = self.buffered.pop_front() {
            return Some(item);
        }
        let batch = self.next_batch().ok()?;
        self.buffered.extend(batch);
        self.buffered.pop_front()
    }
}

impl<T> Drop for WatchIterator<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> fmt::Debug for WatchIterator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchIterator")
            .field("registered", &self.signal.is_some())
            .field("buffered", &self.buffered.len())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
