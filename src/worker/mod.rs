//! Background execution of blocking database work.
//!
//! A [`WorkerPool`] owns one named thread fed by a FIFO channel, so every task queued through
//! the same pool starts in submission order and never overlaps another. The pool knows nothing
//! about connections: it runs opaque [`WorkTask`] closures and reports nothing back. Results
//! reach the caller through [`crate::dispatch`].

mod pool;
mod runner;

pub use pool::{WorkTask, WorkerPool};
