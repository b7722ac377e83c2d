pub mod mpmc;
mod trace;

pub use mpmc::MsQueue;
pub use mpmc::{CancelHandle, Drain, PopError, Signal, SignalError, WatchError, WatchId, WatchIterator};
pub use trace::init_tracing;

/// Common interface for multi-producer / multi-consumer queues.
pub trait MpmcQueue<T: Send>: Send + Sync {
    /// Error on push when the queue cannot take the item.
    type PushError;
    /// Error on pop when the queue is empty.
    type PopError;

    fn push(&self, item: T) -> Result<(), Self::PushError>;
    fn pop(&self) -> Result<T, Self::PopError>;

    /// True when a subsequent `pop` would have failed at the time of the call.
    fn empty(&self) -> bool;
}
