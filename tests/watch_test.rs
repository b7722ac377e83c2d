// mpmc_queues/tests/watch_test.rs

use mpmc_queues::{MsQueue, SignalError, WatchError};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_watch_fires_once_per_registration() {
   let q = MsQueue::new();
   let signal = q.watch();
   assert_eq!(q.watcher_count(), 1);
   assert!(!signal.is_fired());

   q.enqueue(1);
   assert!(signal.is_fired());
   assert_eq!(q.watcher_count(), 0);

   // one-shot: a second enqueue does not reach the spent registration
   q.enqueue(2);
   assert!(!signal.is_fired());
   assert_eq!(signal.wait(), Err(SignalError::Disconnected));
}

#[test]
fn test_watch_fires_every_pending_watcher() {
   let q = MsQueue::new();
   let signals: Vec<_> = (0..8).map(|_| q.watch()).collect();
   q.enqueue("x");
   for s in &signals {
      assert!(s.is_fired());
   }
}

#[test]
fn test_watch_wakes_blocked_waiter() {
   let q = Arc::new(MsQueue::new());
   let signal = q.watch();

   let producer = {
      let q = q.clone();
      thread::spawn(move || {
         thread::sleep(Duration::from_millis(20));
         q.enqueue(42);
      })
   };

   assert_eq!(signal.wait(), Ok(()));
   assert_eq!(q.dequeue(), Some(42));
   producer.join().unwrap();
}

#[test]
fn test_watch_timeout_and_unwatch() {
   let q = MsQueue::<u32>::new();

   let idle = q.watch();
   assert_eq!(
      idle.wait_timeout(Duration::from_millis(10)),
      Err(SignalError::Timeout)
   );

   let released = q.watch();
   assert!(q.unwatch(&released));
   assert!(!q.unwatch(&released));
   q.enqueue(1);
   assert_eq!(released.wait(), Err(SignalError::Disconnected));
}

#[test]
fn test_signal_outliving_queue_is_disconnected() {
   let q = MsQueue::<u32>::new();
   let signal = q.watch();
   drop(q);
   assert_eq!(signal.wait(), Err(SignalError::Disconnected));
}

#[test]
fn test_abandoned_watchers_do_not_block_producers() {
   let q = Arc::new(MsQueue::new());

   // dropped without ever being read, plus live ones nobody reads
   for _ in 0..100 {
      drop(q.watch());
   }
   let unread: Vec<_> = (0..100).map(|_| q.watch()).collect();

   let producer = {
      let q = q.clone();
      thread::spawn(move || {
         for i in 0..1_000 {
            q.enqueue(i);
         }
      })
   };
   producer.join().unwrap();

   assert_eq!(q.watcher_count(), 0);
   assert_eq!(q.drain().count(), 1_000);
   assert!(unread.iter().all(|s| s.is_fired()));
}

/*──────────────────────────── watch iterator ──────────────────────────────*/

#[test]
fn test_watch_iter_returns_whole_backlog() {
   let q = Arc::new(MsQueue::new());
   q.enqueue(1);
   q.enqueue(2);
   q.enqueue(3);

   let mut it = q.watch_iter();
   assert_eq!(it.next_batch(), Ok(vec![1, 2, 3]));
   assert!(q.is_empty());
}

#[test]
fn test_watch_iter_blocks_until_enqueue() {
   let q = Arc::new(MsQueue::new());
   let mut it = q.watch_iter();

   let producer = {
      let q = q.clone();
      thread::spawn(move || {
         thread::sleep(Duration::from_millis(20));
         q.enqueue(7);
      })
   };

   assert_eq!(it.next_batch(), Ok(vec![7]));
   producer.join().unwrap();
}

#[test]
fn test_watch_iter_cancel_wakes_parked_call() {
   let q = Arc::new(MsQueue::<u32>::new());
   let mut it = q.watch_iter();
   let handle = it.cancel_handle();

   let canceller = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      handle.cancel();
   });

   assert_eq!(it.next_batch(), Err(WatchError::Cancelled));
   assert!(it.is_cancelled());
   // the registration was released with the cancellation
   assert_eq!(q.watcher_count(), 0);
   canceller.join().unwrap();

   // permanent, even once values show up
   q.enqueue(1);
   assert_eq!(it.next_batch(), Err(WatchError::Cancelled));
   assert_eq!(q.dequeue(), Some(1));
}

#[test]
fn test_watch_iter_cancel_before_first_batch() {
   let q = Arc::new(MsQueue::new());
   q.enqueue(1);

   let mut it = q.watch_iter();
   it.cancel();
   it.cancel();
   assert_eq!(it.next_batch(), Err(WatchError::Cancelled));
   assert_eq!(it.next(), None);
   assert_eq!(q.dequeue(), Some(1));
}

#[test]
fn test_watch_iter_drop_releases_registration() {
   let q = Arc::new(MsQueue::new());
   q.enqueue(1);

   let mut it = q.watch_iter();
   assert_eq!(it.next_batch(), Ok(vec![1]));
   assert_eq!(q.watcher_count(), 1);
   drop(it);
   assert_eq!(q.watcher_count(), 0);
}

#[test]
fn test_watch_iter_as_iterator() {
   let q = Arc::new(MsQueue::new());
   let mut it = q.watch_iter();

   let producer = {
      let q = q.clone();
      thread::spawn(move || {
         for i in 0..100 {
            q.enqueue(i);
            if i % 10 == 0 {
               thread::sleep(Duration::from_millis(1));
            }
         }
      })
   };

   let got: Vec<i32> = it.by_ref().take(100).collect();
   assert_eq!(got, (0..100).collect::<Vec<_>>());
   producer.join().unwrap();

   it.cancel();
   assert_eq!(it.next(), None);
}

#[test]
fn test_watch_iter_competing_consumers() {
   const PRODUCERS: usize = 2;
   const PER_PRODUCER: usize = 2_000;
   const TOTAL: usize = PRODUCERS * PER_PRODUCER;

   let q = Arc::new(MsQueue::new());
   let taken = Arc::new(AtomicUsize::new(0));

   let mut cancels = Vec::new();
   let consumers: Vec<_> = (0..2)
      .map(|_| {
         let mut it = q.watch_iter();
         cancels.push(it.cancel_handle());
         let taken = taken.clone();
         thread::spawn(move || {
            let mut got = Vec::new();
            while let Ok(batch) = it.next_batch() {
               taken.fetch_add(batch.len(), Ordering::SeqCst);
               got.extend(batch);
            }
            got
         })
      })
      .collect();

   let producers: Vec<_> = (0..PRODUCERS)
      .map(|p| {
         let q = q.clone();
         thread::spawn(move || {
            for i in 0..PER_PRODUCER {
               q.enqueue(p * PER_PRODUCER + i);
            }
         })
      })
      .collect();
   for p in producers {
      p.join().unwrap();
   }

   let deadline = Instant::now() + Duration::from_secs(10);
   while taken.load(Ordering::SeqCst) < TOTAL {
      assert!(Instant::now() < deadline, "watch iterators stalled");
      thread::sleep(Duration::from_millis(1));
   }
   for c in &cancels {
      c.cancel();
   }

   let mut all: Vec<usize> = consumers
      .into_iter()
      .flat_map(|c| c.join().unwrap())
      .collect();
   all.sort_unstable();
   assert_eq!(all, (0..TOTAL).collect::<Vec<_>>());
   assert_eq!(q.watcher_count(), 0);
}
