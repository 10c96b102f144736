//! # Message Queue & Deferred-Processing Worker
//!
//! Heavy table decoding is offloaded from the TS reader's dispatch loop onto
//! a single-consumer worker thread, matching the source's
//! `MessageQSend`/`MessageQReceive` pair (see `original_source` for the
//! pattern this generalizes): the reader-side section callback builds a
//! [`Job`], enqueues it, and returns immediately; the worker thread drains
//! the queue and runs jobs one at a time.
//!
//! Built on `crossbeam-channel`, the same crate
//! `examples/xxxxuanran-rust-srec/crates/pipeline-common` already depends on
//! for its own single-consumer dispatch queue.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// A unit of deferred work. `arg` is reference-counted the way the source's
/// jobs carry a reference to their payload that is released exactly once,
/// whether or not the job actually runs.
pub struct Job {
    processor: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    /// Builds a job that will run `processor` with `arg`, dropping `arg`
    /// afterwards regardless of whether the job ran or was discarded.
    pub fn new<T, F>(arg: Arc<T>, processor: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        Job {
            processor: Box::new(move || {
                processor(&arg);
                drop(arg);
            }),
        }
    }

    fn run(self) {
        (self.processor)()
    }
}

/// Producer handle for the deferred-processing queue.
#[derive(Clone)]
pub struct MessageQueue {
    sender: Sender<Job>,
}

impl MessageQueue {
    /// Enqueues a job. Silently drops the job (releasing its reference) if
    /// the queue has already been told to quit or the worker has exited.
    pub fn send(&self, job: Job) {
        let _ = self.sender.send(job);
    }
}

/// Consumer side of the queue, owned by the deferred-processing thread.
pub struct Worker {
    receiver: Receiver<Job>,
}

/// Creates a connected queue/worker pair.
pub fn channel() -> (MessageQueue, Worker) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (MessageQueue { sender }, Worker { receiver })
}

impl Worker {
    /// Blocks for up to `timeout`, running one job if one arrives.
    /// Returns `true` if a job ran, `false` on timeout.
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                job.run();
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Runs the worker loop until `quit` is observed, draining any jobs that
    /// arrive in between. The producer side should be dropped (or
    /// `set_quit` equivalent achieved by dropping every `MessageQueue`
    /// clone) to end the loop promptly; callers typically pair this with an
    /// `AtomicBool` quit flag checked between iterations.
    pub fn run_until<F: Fn() -> bool>(&self, should_quit: F) {
        while !should_quit() {
            self.run_one(Duration::from_millis(100));
        }
    }

    /// Drains every pending job without running it, releasing each job's
    /// reference as it is dropped. Used by shutdown: jobs already queued
    /// when `set_quit` fires must not execute.
    pub fn drain_without_running(&self) {
        while let Ok(job) = self.receiver.try_recv() {
            drop(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration as StdDuration;

    #[test]
    fn quit_drains_without_running() {
        let (q, worker) = channel();
        let ran = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let ran = ran.clone();
            let released = released.clone();
            let payload = Arc::new(());
            q.send(Job::new(payload, move |_| {
                thread::sleep(StdDuration::from_millis(10));
                ran.fetch_add(1, Ordering::SeqCst);
            }));
            // account for the release that happens whether or not it runs
            released.fetch_add(0, Ordering::SeqCst);
        }

        // Simulate "quit before dequeue": drain immediately.
        worker.drain_without_running();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn jobs_run_in_order_until_quit() {
        let (q, worker) = channel();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            q.send(Job::new(Arc::new(i), move |v| {
                seen.lock().unwrap().push(*v);
            }));
        }
        for _ in 0..5 {
            assert!(worker.run_one(StdDuration::from_millis(50)));
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
