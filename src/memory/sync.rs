//! Background thread for delayed snapshot writes.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

#[derive(Default)]
struct Pending {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<Pending>,
    wake: Condvar,
}

/// Runs a task once the store has been quiet for a fixed delay.
///
/// Every [`SyncScheduler::schedule`] pushes the deadline back, so a burst
/// of commits results in one run.
pub(crate) struct SyncScheduler {
    shared: Arc<Shared>,
    delay: Duration,
    worker: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub(crate) fn spawn<F>(delay: Duration, task: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let worker = thread::Builder::new()
            .name("quadstore-sync".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run(&shared, task)
            })?;
        Ok(Self {
            shared,
            delay,
            worker: Some(worker),
        })
    }

    /// Arms or re-arms the timer.
    pub(crate) fn schedule(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(Instant::now() + self.delay);
        self.shared.wake.notify_one();
        trace!(delay_ms = self.delay.as_millis() as u64, "memory.sync.schedule");
    }

    /// Disarms the timer.
    pub(crate) fn cancel(&self) {
        let mut state = self.shared.state.lock();
        if state.deadline.take().is_some() {
            trace!("memory.sync.cancel");
        }
    }

    /// Stops the thread without running a pending task.
    pub(crate) fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
            self.shared.wake.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F: FnMut()>(shared: &Shared, mut task: F) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => shared.wake.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                MutexGuard::unlocked(&mut state, &mut task);
            }
            Some(deadline) => {
                shared.wake.wait_until(&mut state, deadline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(delay: Duration) -> (SyncScheduler, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = SyncScheduler::spawn(delay, {
            let runs = Arc::clone(&runs);
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        (scheduler, runs)
    }

    #[test]
    fn bursts_coalesce_into_one_run() {
        let (scheduler, runs) = counting(Duration::from_millis(50));
        for _ in 0..5 {
            scheduler.schedule();
        }
        thread::sleep(Duration::from_millis(400));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_and_shutdown_skip_the_task() {
        let (mut scheduler, runs) = counting(Duration::from_millis(50));
        scheduler.schedule();
        scheduler.cancel();
        thread::sleep(Duration::from_millis(200));
        scheduler.schedule();
        scheduler.shutdown();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
