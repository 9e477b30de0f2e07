use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::debug;

use crate::error::ReactorError;

use super::runner::run_worker;

/// Unit of work executed on the worker thread. Runs at most once.
pub type WorkTask = Box<dyn FnOnce() + Send + 'static>;

/// Single-queue background executor.
///
/// After [`WorkerPool::restart`] the replacement thread is only spawned by the next
/// [`WorkerPool::submit`], so a pool that is never used again holds no idle thread.
pub struct WorkerPool {
    name: String,
    state: Mutex<WorkerGeneration>,
}

struct WorkerGeneration {
    /// `None` between a restart and the next submit.
    sender: Option<Sender<WorkTask>>,
    cancelled: Arc<AtomicBool>,
    generation: u64,
}

impl WorkerPool {
    /// Spawn the first worker thread.
    ///
    /// # Errors
    /// Returns [`ReactorError::ConnectionError`] if the thread cannot be spawned.
    pub fn new(name: impl Into<String>) -> Result<Self, ReactorError> {
        let name = name.into();
        let (sender, cancelled) = spawn_worker(&name, 0)?;
        Ok(Self {
            name,
            state: Mutex::new(WorkerGeneration {
                sender: Some(sender),
                cancelled,
                generation: 0,
            }),
        })
    }

    /// Queue a task behind everything already submitted and return immediately.
    ///
    /// # Errors
    /// Returns [`ReactorError::ConnectionError`] if the worker thread is gone or a replacement
    /// cannot be spawned.
    pub fn submit(&self, task: WorkTask) -> Result<(), ReactorError> {
        let mut state = self.lock_state();
        if state.sender.is_none() {
            let (sender, cancelled) = spawn_worker(&self.name, state.generation)?;
            state.sender = Some(sender);
            state.cancelled = cancelled;
        }
        let sender = state
            .sender
            .as_ref()
            .ok_or_else(|| connection_error("worker queue unavailable"))?;
        sender
            .send(task)
            .map_err(|_| connection_error("worker thread closed"))
    }

    /// Retire the worker thread, discarding every task that has not started yet.
    ///
    /// A task that is already running on the old thread is left to finish; it is the
    /// submitter's job to ignore its outcome. The old thread exits once its queue is drained
    /// and a fresh one is spawned by the next [`WorkerPool::submit`].
    pub fn restart(&self) {
        let mut state = self.lock_state();
        state.cancelled.store(true, Ordering::Release);
        state.sender = None;
        state.generation += 1;
        debug!(worker = %self.name, generation = state.generation, "restarting worker");
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerGeneration> {
        // Nothing panics while holding this lock; recover instead of propagating poison.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("generation", &state.generation)
            .field("running", &state.sender.is_some())
            .finish()
    }
}

fn spawn_worker(
    name: &str,
    generation: u64,
) -> Result<(Sender<WorkTask>, Arc<AtomicBool>), ReactorError> {
    let (sender, receiver) = mpsc::channel::<WorkTask>();
    let cancelled = Arc::new(AtomicBool::new(false));
    let thread_cancelled = Arc::clone(&cancelled);
    let thread_name = format!("sqlite-worker-{name}");
    let worker_name = thread_name.clone();

    thread::Builder::new()
        .name(thread_name)
        .spawn(move || run_worker(&worker_name, &receiver, &thread_cancelled))
        .map_err(|err| {
            ReactorError::ConnectionError(format!("failed to spawn SQLite worker thread: {err}"))
        })?;
    debug!(worker = name, generation, "spawned worker");
    Ok((sender, cancelled))
}

fn connection_error(message: &str) -> ReactorError {
    ReactorError::ConnectionError(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn tasks_start_in_submission_order() {
        let pool = WorkerPool::new("order").unwrap();
        let (tx, rx) = channel();
        for i in 0..20 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let seen: Vec<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn restart_discards_queued_but_not_running_tasks() {
        let pool = WorkerPool::new("restart").unwrap();
        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel::<()>();
        let (done_tx, done_rx) = channel();

        let running_done = done_tx.clone();
        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            running_done.send("running").unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..3 {
            let done_tx = done_tx.clone();
            pool.submit(Box::new(move || done_tx.send("queued").unwrap()))
                .unwrap();
        }

        pool.restart();
        assert_eq!(pool.lock_state().generation, 1);
        release_tx.send(()).unwrap();

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "running");

        let after = done_tx.clone();
        pool.submit(Box::new(move || after.send("fresh").unwrap()))
            .unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "fresh");
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn restart_spawns_the_replacement_only_on_demand() {
        let pool = WorkerPool::new("lazy").unwrap();
        pool.restart();
        pool.restart();
        assert_eq!(pool.lock_state().generation, 2);
        assert!(pool.lock_state().sender.is_none());

        let (tx, rx) = channel();
        pool.submit(Box::new(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        }))
        .unwrap();
        assert!(pool.lock_state().sender.is_some());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap().as_deref(),
            Some("sqlite-worker-lazy")
        );
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let pool = WorkerPool::new("panic").unwrap();
        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = channel();
        pool.submit(Box::new(move || tx.send(42).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
