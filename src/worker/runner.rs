use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;

use tracing::{debug, error, warn};

use super::pool::WorkTask;

pub(super) fn run_worker(name: &str, receiver: &Receiver<WorkTask>, cancelled: &Arc<AtomicBool>) {
    let mut discarded = 0usize;

    while let Ok(task) = receiver.recv() {
        if cancelled.load(Ordering::Acquire) {
            // Queued before a restart; dropping it abandons whatever it would have reported.
            drop(task);
            discarded += 1;
            continue;
        }
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(worker = name, "task panicked; worker continues");
        }
    }

    if discarded > 0 {
        warn!(worker = name, discarded, "discarded queued tasks after restart");
    }
    debug!(worker = name, "worker exited");
}
