//! Named worker threads and the handle used to stop periodic ones.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::error::{PlayerError, Result};

/// Spawn a named thread. Failure to start a worker is fatal to the caller.
pub(crate) fn spawn_named<F>(name: &'static str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| PlayerError::Spawn { name, source })
}

/// Stop signal for a periodic worker. Dropping the matching [`WorkerHandle`] (or calling
/// [`WorkerHandle::stop`]) disconnects it.
pub(crate) struct StopSignal(Receiver<()>);

impl StopSignal {
    /// Sleep for `period`. Returns `false` once the worker should exit.
    pub(crate) fn tick(&self, period: Duration) -> bool {
        matches!(self.0.recv_timeout(period), Err(RecvTimeoutError::Timeout))
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.0
    }
}

/// Owner of a periodic worker thread.
pub struct WorkerHandle {
    name: &'static str,
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn `f` with a fresh stop signal.
    pub(crate) fn spawn<F>(name: &'static str, f: F) -> Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let (stop, stop_rx) = bounded(1);
        let join = spawn_named(name, move || f(StopSignal(stop_rx)))?;
        Ok(Self {
            name,
            stop: Some(stop),
            join: Some(join),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the worker and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!(worker = self.name, "worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stop_ends_a_ticking_worker() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = WorkerHandle::spawn("test-ticker", move |stop| {
            while stop.tick(Duration::from_millis(1)) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap();
        while ticks.load(Ordering::Relaxed) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.name(), "test-ticker");
        handle.stop();
        let seen = ticks.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(ticks.load(Ordering::Relaxed), seen);
    }
}
