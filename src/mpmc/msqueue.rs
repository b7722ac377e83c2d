// Unbounded multi-producer / multi-consumer queue
//
// Michael & Scott's two-pointer linked list (PODC 1996). `dummy` is the
// sentinel marking how far the list has been consumed; `tail` is a hint
// to the last linked node that any thread may help forward. Retired
// sentinels are handed to crossbeam's epoch collector, so a node is only
// freed once no pinned thread can still be looking at it.

use crate::mpmc::notify::{Signal, WatchRegistry};
use crate::MpmcQueue;
use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use crossbeam::utils::{Backoff, CachePadded};
use std::{
   convert::Infallible,
   fmt,
   mem::MaybeUninit,
   sync::atomic::Ordering,
};

/*──────────────────────────────────────────────────────────────────────────*/
/*  Node                                                                    */
/*──────────────────────────────────────────────────────────────────────────*/

struct Node<T> {
   // uninitialized in the sentinel, and again once the value was taken
   value: MaybeUninit<T>,
   next : Atomic<Node<T>>,
}

impl<T> Node<T> {
   fn sentinel() -> Self {
      Self { value: MaybeUninit::uninit(), next: Atomic::null() }
   }

   fn with_value(value: T) -> Self {
      Self { value: MaybeUninit::new(value), next: Atomic::null() }
   }
}

/// Returned by [`MpmcQueue::pop`] when no value was linked at the time of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue is empty")]
pub struct PopError;

/*──────────────────────────────────────────────────────────────────────────*/
/*  Queue header                                                            */
/*──────────────────────────────────────────────────────────────────────────*/

/// Lock-free unbounded FIFO queue with wakeup notifications.
///
/// Any number of threads may call [`enqueue`](Self::enqueue) and
/// [`dequeue`](Self::dequeue) at the same time. Neither takes a lock on the
/// data path; contention is resolved by CAS retry. Values come out in the
/// order their link CAS succeeded, and each value is handed to exactly one
/// `dequeue` call.
///
/// After every enqueue the queue fires all pending [`Signal`]s registered
/// through [`watch`](Self::watch). Firing never blocks the producer.
pub struct MsQueue<T> {
   dummy   : CachePadded<Atomic<Node<T>>>, // advanced by consumers
   tail    : CachePadded<Atomic<Node<T>>>, // advanced by producers (and helpers)
   watchers: WatchRegistry,
}

unsafe impl<T: Send> Sync for MsQueue<T> {}
unsafe impl<T: Send> Send for MsQueue<T> {}

impl<T> MsQueue<T> {
   /// Create an empty queue: one sentinel, with `tail == dummy`.
   pub fn new() -> Self {
      let q = Self {
         dummy   : CachePadded::new(Atomic::null()),
         tail    : CachePadded::new(Atomic::null()),
         watchers: WatchRegistry::new(),
      };

      // nobody else can see the queue yet
      let guard = unsafe { epoch::unprotected() };
      let sentinel = Owned::new(Node::sentinel()).into_shared(guard);
      q.dummy.store(sentinel, Ordering::Relaxed);
      q.tail.store(sentinel, Ordering::Relaxed);
      q
   }

   /// Append `value` at the back of the queue, then fire every pending watcher.
   pub fn enqueue(&self, value: T) {
      {
         let guard = &epoch::pin();
         let new = Owned::new(Node::with_value(value)).into_shared(guard);
         let old_tail = self.link(new, guard);

         // Swing `tail` to the new node. A concurrent enqueue may already
         // have helped it forward; the node is reachable either way.
         let _ = self
            .tail
            .compare_exchange(old_tail, new, Ordering::Release, Ordering::Relaxed, guard);
      }

      self.watchers.notify();
   }

   // Link `new` after the true last node; returns the node it was linked to.
   fn link<'g>(&self, new: Shared<'g, Node<T>>, guard: &'g Guard) -> Shared<'g, Node<T>> {
      let backoff = Backoff::new();
      loop {
         let tail = self.tail.load(Ordering::Acquire, guard);
         // `tail` is never null and never freed while we are pinned
         let tail_ref = unsafe { tail.deref() };
         let next = tail_ref.next.load(Ordering::Acquire, guard);

         if self.tail.load(Ordering::Acquire, guard) != tail {
            continue;
         }

         if !next.is_null() {
            // tail is lagging: help it forward, then retry
            let _ = self
               .tail
               .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
            continue;
         }

         if tail_ref
            .next
            .compare_exchange(Shared::null(), new, Ordering::Release, Ordering::Relaxed, guard)
            .is_ok()
         {
            return tail;
         }
         backoff.spin();
      }
   }

   /// Remove the value at the front of the queue.
   ///
   /// Never blocks. `None` means the queue was observed empty; that
   /// observation is not retried.
   pub fn dequeue(&self) -> Option<T> {
      let guard = &epoch::pin();
      let backoff = Backoff::new();
      loop {
         let dummy = self.dummy.load(Ordering::Acquire, guard);
         let head = unsafe { dummy.deref() }.next.load(Ordering::Acquire, guard);
         let tail = self.tail.load(Ordering::Acquire, guard);

         if self.dummy.load(Ordering::Acquire, guard) != dummy {
            continue;
         }

         let head_ref = unsafe { head.as_ref() }?;

         if tail == dummy {
            // `tail` would fall behind `dummy`; move it onto `head` first
            let _ = self
               .tail
               .compare_exchange(dummy, head, Ordering::Release, Ordering::Relaxed, guard);
            continue;
         }

         if self
            .dummy
            .compare_exchange(dummy, head, Ordering::AcqRel, Ordering::Acquire, guard)
            .is_ok()
         {
            // `head` is the new sentinel and only this thread owns its value.
            // The old sentinel is unreachable from the queue; free it once
            // every thread pinned right now has moved on.
            unsafe {
               guard.defer_destroy(dummy);
               return Some(head_ref.value.assume_init_read());
            }
         }
         backoff.spin();
      }
   }

   /// True when no value is linked behind the sentinel at this instant.
   pub fn is_empty(&self) -> bool {
      let guard = &epoch::pin();
      let dummy = self.dummy.load(Ordering::Acquire, guard);
      unsafe { dummy.deref() }.next.load(Ordering::Acquire, guard).is_null()
   }

   /// Register a one-shot wakeup fired by the next successful enqueue.
   ///
   /// A watcher that wants to hear about later enqueues must call `watch`
   /// again after its signal fired.
   pub fn watch(&self) -> Signal {
      self.watchers.watch()
   }

   /// Drop a still-pending registration. Returns `false` if it already fired.
   pub fn unwatch(&self, signal: &Signal) -> bool {
      self.watchers.unwatch(signal.id())
   }

   /// Number of registrations waiting for the next enqueue.
   pub fn watcher_count(&self) -> usize {
      self.watchers.len()
   }
}

impl<T> Default for MsQueue<T> {
   fn default() -> Self {
      Self::new()
   }
}

impl<T> Drop for MsQueue<T> {
   fn drop(&mut self) {
      while self.dequeue().is_some() {}

      // `&mut self`: no other thread holds a reference any more
      unsafe {
         let guard = epoch::unprotected();
         let sentinel = self.dummy.load(Ordering::Relaxed, guard);
         drop(sentinel.into_owned());
      }
   }
}

impl<T> fmt::Debug for MsQueue<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("MsQueue")
       .field("empty", &self.is_empty())
       .field("watchers", &self.watcher_count())
       .finish()
   }
}

/*──────────────────────────── trait plumbing ──────────────────────────────*/

impl<T: Send> MpmcQueue<T> for MsQueue<T> {
   type PushError = Infallible;
   type PopError  = PopError;

   #[inline]
   fn push(&self, item: T) -> Result<(), Infallible> {
      self.enqueue(item);
      Ok(())
   }

   #[inline]
   fn pop(&self) -> Result<T, PopError> {
      self.dequeue().ok_or(PopError)
   }

   #[inline]
   fn empty(&self) -> bool {
      self.is_empty()
   }
}
