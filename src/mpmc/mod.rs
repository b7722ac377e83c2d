mod drain;
mod msqueue;
mod notify;
mod watch;

pub use drain::Drain;
pub use msqueue::{MsQueue, PopError};
pub use notify::{Signal, SignalError, WatchId};
pub use watch::{CancelHandle, WatchError, WatchIterator};
