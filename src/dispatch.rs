//! Delivery of results back onto the caller's thread.
//!
//! Worker tasks never invoke user code directly. They post a job through a
//! [`CallbackDispatcher`], and the job runs only when the owning thread pumps its
//! [`CallerLoop`]. Every job carries the gate of the connection that produced it; a job whose
//! gate is closed by the time it would run is dropped, as is a result that finishes on the
//! worker after the gate closed. Either way the matching [`Completion`] ends up
//! [`CompletionState::Abandoned`]: it never resolves and never rejects.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::ReactorError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sending half: cloneable, usable from any thread.
#[derive(Clone)]
pub struct CallbackDispatcher {
    sender: Sender<Job>,
}

/// Receiving half, owned by the caller thread. Jobs run only inside its methods.
pub struct CallerLoop {
    receiver: Receiver<Job>,
}

/// Create a dispatcher and the loop that drains it.
#[must_use]
pub fn callback_channel() -> (CallbackDispatcher, CallerLoop) {
    let (sender, receiver) = mpsc::channel();
    (CallbackDispatcher { sender }, CallerLoop { receiver })
}

impl CallbackDispatcher {
    /// Post a job to the caller thread. Returns `false` if the caller loop is gone.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Box::new(job)).is_ok()
    }

    /// Post a job that is skipped if `gate` is closed when the caller thread gets to it.
    pub(crate) fn post_gated(&self, gate: &Gate, job: impl FnOnce() + Send + 'static) -> bool {
        if gate.is_closed() {
            return false;
        }
        let gate = gate.clone();
        self.post(move || {
            if gate.is_closed() {
                trace!("dropping callback for invalidated connection");
                return;
            }
            job();
        })
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher").finish_non_exhaustive()
    }
}

impl CallerLoop {
    /// Run every job that is already queued. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Run jobs as they arrive until `timeout` elapses. Returns how many ran.
    pub fn run_for(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.receiver.recv_timeout(remaining) {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        ran
    }

    /// Pump jobs until `completion` settles, is abandoned, or `timeout` elapses.
    ///
    /// Jobs belonging to other operations run along the way, in arrival order.
    pub fn wait<T>(&self, completion: &mut Completion<T>, timeout: Duration) -> CompletionState<T> {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            match completion.try_take() {
                CompletionState::Pending => {}
                done => return done,
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return CompletionState::Pending;
            };
            // Short slices so an abandonment (sender dropped on a worker) is noticed promptly.
            let slice = remaining.min(Duration::from_millis(10));
            if let Ok(job) = self.receiver.recv_timeout(slice) {
                job();
            }
        }
    }

    /// Run jobs until every dispatcher has been dropped.
    pub fn run(self) {
        while let Ok(job) = self.receiver.recv() {
            job();
        }
    }
}

/// Shared open/closed flag. Closing is one-way.
#[derive(Clone, Debug, Default)]
pub(crate) struct Gate(Arc<AtomicBool>);

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Close the gate. Returns `true` only for the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Observable state of a [`Completion`].
#[derive(Debug)]
pub enum CompletionState<T> {
    /// Still running, or the result has not been delivered on the caller thread yet.
    Pending,
    /// Resolved (`Ok`) or rejected (`Err`).
    Settled(Result<T, ReactorError>),
    /// The owning connection was invalidated; no result will ever be delivered.
    Abandoned,
}

impl<T> CompletionState<T> {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

/// Future-like handle returned by every asynchronous operation.
///
/// Awaiting an abandoned completion never finishes, the same way a promise that is neither
/// resolved nor rejected never finishes. Use [`Completion::try_take`] or
/// [`CallerLoop::wait`] to observe abandonment explicitly.
#[derive(Debug)]
#[must_use = "a completion does nothing unless inspected or awaited"]
pub struct Completion<T> {
    receiver: oneshot::Receiver<Result<T, ReactorError>>,
    taken: bool,
}

impl<T> Completion<T> {
    /// Non-blocking check. A settled value is handed out once; later calls report `Abandoned`.
    pub fn try_take(&mut self) -> CompletionState<T> {
        if self.taken {
            return CompletionState::Abandoned;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.taken = true;
                CompletionState::Settled(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => CompletionState::Pending,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.taken = true;
                CompletionState::Abandoned
            }
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, ReactorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.taken {
            return Poll::Pending;
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                self.taken = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                self.taken = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Producer side of a [`Completion`], moved into a worker task.
pub(crate) struct Resolver<T> {
    sender: oneshot::Sender<Result<T, ReactorError>>,
    dispatcher: CallbackDispatcher,
    gate: Gate,
}

pub(crate) fn completion<T>(dispatcher: &CallbackDispatcher, gate: &Gate) -> (Resolver<T>, Completion<T>) {
    let (sender, receiver) = oneshot::channel();
    (
        Resolver {
            sender,
            dispatcher: dispatcher.clone(),
            gate: gate.clone(),
        },
        Completion {
            receiver,
            taken: false,
        },
    )
}

impl<T: Send + 'static> Resolver<T> {
    /// Deliver `result` on the caller thread unless the gate closed first.
    pub(crate) fn settle(self, result: Result<T, ReactorError>) {
        let Resolver {
            sender,
            dispatcher,
            gate,
        } = self;
        dispatcher.post_gated(&gate, move || {
            let _ = sender.send(result);
        });
    }
}
