// Snapshot drains: read until the first empty observation, then stop.
use crate::mpmc::MsQueue;
use crate::trace::{debug, warn};
use crossbeam::channel::{self, Receiver};
use std::{iter::FusedIterator, sync::Arc, thread};

/// Same-thread drain returned by [`MsQueue::drain`].
///
/// Ends at the first `dequeue` that finds the queue empty, even if other
/// producers enqueue afterwards.
#[derive(Debug)]
pub struct Drain<'a, T> {
   queue: &'a MsQueue<T>,
   done : bool,
}

impl<T> Iterator for Drain<'_, T> {
   type Item = T;

   fn next(&mut self) -> Option<T> {
      if self.done {
         return None;
      }
      let item = self.queue.dequeue();
      self.done = item.is_none();
      item
   }
}

impl<T> FusedIterator for Drain<'_, T> {}

impl<T> MsQueue<T> {
   pub fn drain(&self) -> Drain<'_, T> {
      Drain { queue: self, done: false }
   }
}

impl<T: Send + 'static> MsQueue<T> {
   /// Drain the queue from a background thread.
   ///
   /// Values are handed over through a zero-capacity channel, so the drain
   /// thread only runs ahead by the value it is currently offering. The
   /// channel closes at the first empty observation.
   ///
   /// If the receiver is dropped mid-drain, the value that was on offer is
   /// put back at the tail of the queue and the thread exits.
   pub fn drain_sequence(self: &Arc<Self>) -> Receiver<T> {
      let (tx, rx) = channel::bounded(0);
      let queue = Arc::clone(self);

      thread::spawn(move || {
         let mut sent = 0usize;
         while let Some(item) = queue.dequeue() {
            if let Err(channel::SendError(item)) = tx.send(item) {
               warn!(sent, "drain receiver hung up, re-enqueueing pending value");
               queue.enqueue(item);
               return;
            }
            sent += 1;
         }
         debug!(sent, "drain sequence closed");
      });

      rx
   }
}
