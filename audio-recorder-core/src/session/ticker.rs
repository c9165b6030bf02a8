use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};

/// A named session thread that runs until `shutdown` (or drop).
///
/// Either periodic (timers) or woken through a channel (the processing
/// worker). Shutdown is cooperative: the thread finishes its current call
/// and is joined.
pub(crate) struct BackgroundThread {
    name: String,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundThread {
    /// Call `tick` every `period` until shut down.
    pub fn periodic<F>(name: &str, period: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self::new(name, shutdown, handle))
    }

    /// Call `work` each time something arrives on `wake`.
    pub fn on_wake<F>(name: &str, wake: Receiver<()>, mut work: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                select! {
                    recv(wake) -> msg => {
                        if msg.is_err() {
                            break;
                        }
                        work();
                    }
                    recv(stop_rx) -> _ => break,
                }
            })?;
        Ok(Self::new(name, shutdown, handle))
    }

    fn new(name: &str, shutdown: Sender<()>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.to_string(),
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        let Some(handle) = self.handle.take() else {
            return;
        };
        // A delegate callback running on this thread may itself stop the
        // session; it cannot join itself.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("{} thread panicked", self.name);
        }
    }
}

impl Drop for BackgroundThread {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn periodic_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let t = BackgroundThread::periodic("test-ticker", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(60));
        t.shutdown();
        let after = ticks.load(Ordering::SeqCst);
        assert!(after >= 2, "only {} ticks", after);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn worker_runs_once_per_wake() {
        let (wake_tx, wake_rx) = bounded(4);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let w = BackgroundThread::on_wake("test-worker", wake_rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        wake_tx.send(()).unwrap();
        wake_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while runs.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        w.shutdown();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
