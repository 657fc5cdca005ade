//! Deferred Work (C10): an off-reactor FIFO job queue for callbacks that
//! may block (e.g. writing to a remote log sink). A single worker thread
//! drains it; jobs run exactly once; posting after shutdown is a silent
//! no-op (spec.md §4.10).

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use tracing::debug;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct DeferredWorker {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl DeferredWorker {
    pub fn start() -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let handle = std::thread::Builder::new()
            .name("DeferredWorker".into())
            .spawn(move || {
                debug!("deferred worker started");
                for job in receiver {
                    job();
                }
                debug!("deferred worker finished");
            })
            .expect("spawn deferred worker");

        DeferredWorker {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Submits a job for later, off-reactor execution. A no-op once
    /// [`DeferredWorker::shutdown`] has run (spec.md §4.10); this is not an
    /// error, since a caller racing shutdown has no way to know in time.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }

    /// Closes the queue and waits for the worker thread to drain whatever
    /// was already submitted, then exit.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for DeferredWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a shared [`DeferredWorker`], for collaborators (e.g. external
/// delivery sinks) that only need to submit jobs.
pub type SharedDeferred = Arc<DeferredWorker>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_exactly_once_fifo() {
        let worker = DeferredWorker::start();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            worker.submit(move || order.lock().unwrap().push(i));
        }

        let mut worker = worker;
        worker.shutdown();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn submit_after_shutdown_is_silent_no_op() {
        let mut worker = DeferredWorker::start();
        worker.shutdown();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        worker.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // give a (nonexistent) worker thread time to run it, to make sure
        // the no-op claim isn't just a race we got lucky on
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
