use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

/// Longest uninterrupted sleep, bounding how long a stop request waits.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// A named OS thread with a shared "active" flag as its only cancellation.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    active: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        debug!("{} worker started", name);
        Ok(Self {
            name: name.to_string(),
            active,
            join: Some(join),
        })
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Clears the flag and waits for the thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("{} worker panicked", self.name);
            } else {
                debug!("{} worker stopped", self.name);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleeps up to `total`, returning early once `active` is cleared.
/// Returns whether the worker is still active.
pub fn pause(active: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !active.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(PAUSE_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_stop_is_idempotent_and_prompt() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut worker = WorkerHandle::spawn("test", move |active| {
            while pause(&active, Duration::from_secs(10)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        assert!(worker.is_running());
        let started = Instant::now();
        worker.stop();
        worker.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!worker.is_running());
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pause_runs_full_duration_when_active() {
        let active = AtomicBool::new(true);
        let started = Instant::now();
        assert!(pause(&active, Duration::from_millis(60)));
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
