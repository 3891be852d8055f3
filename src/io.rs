//! Disk I/O pool
//!
//! Disk operations are submitted to a bounded pool of worker threads and
//! produce an [`IoTask`]: a one-shot promise the caller can either block on
//! (`wait`) or attach a continuation to (`on_complete`). Submission never
//! blocks the calling thread.
//!
//! There is no cancellation: dropping an `IoTask` abandons the result but
//! the underlying operation still runs to completion.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded pool of disk I/O worker threads
pub struct IoPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl IoPool {
    /// Spawn a pool with `threads` workers
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("chainkv-io-{}", id))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .expect("failed to spawn I/O worker thread");
            workers.push(handle);
        }

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Submit a job for execution on the pool. Returns immediately with a
    /// task handle for the eventual result.
    pub fn submit<T, F>(&self, job: F) -> IoTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let shared = Arc::new(TaskShared {
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
        });

        let task_shared = Arc::clone(&shared);
        let wrapped: Job = Box::new(move || {
            let result = job();
            TaskShared::complete(&task_shared, result);
        });

        if let Some(sender) = &self.sender {
            // A send only fails once the pool is shut down; the engine
            // rejects operations on a closed store before reaching this.
            let _ = sender.send(wrapped);
        }

        IoTask { shared }
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain and exit
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Task Promise
// =============================================================================

enum TaskState<T> {
    /// Result not available yet
    Pending,

    /// Result available, waiting to be claimed
    Complete(Result<T>),

    /// A continuation will consume the result on the worker thread
    Callback(Box<dyn FnOnce(Result<T>) + Send + 'static>),

    /// Result already handed over
    Claimed,
}

struct TaskShared<T> {
    state: Mutex<TaskState<T>>,
    done: Condvar,
}

impl<T> TaskShared<T> {
    fn complete(shared: &Arc<Self>, result: Result<T>) {
        let mut state = shared.state.lock();
        match std::mem::replace(&mut *state, TaskState::Claimed) {
            TaskState::Callback(callback) => {
                // Run the continuation outside the lock, on the worker thread
                drop(state);
                callback(result);
            }
            _ => {
                *state = TaskState::Complete(result);
                shared.done.notify_all();
            }
        }
    }
}

/// Handle to the result of a submitted disk operation
pub struct IoTask<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T> IoTask<T> {
    /// Block the calling thread until the operation finishes
    pub fn wait(self) -> Result<T> {
        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, TaskState::Claimed) {
                TaskState::Complete(result) => return result,
                TaskState::Pending => {
                    *state = TaskState::Pending;
                    self.shared.done.wait(&mut state);
                }
                // wait() and on_complete() both consume the task, so the
                // state cannot be Callback or Claimed here
                _ => unreachable!("task consumed twice"),
            }
        }
    }

    /// Attach a continuation instead of blocking. Runs on the worker thread
    /// once the operation finishes, or immediately on the calling thread if
    /// it already has.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let immediate = {
            let mut state = self.shared.state.lock();
            match std::mem::replace(&mut *state, TaskState::Claimed) {
                TaskState::Complete(result) => Some(result),
                TaskState::Pending => {
                    *state = TaskState::Callback(Box::new(callback));
                    return;
                }
                _ => unreachable!("task consumed twice"),
            }
        };

        if let Some(result) = immediate {
            callback(result);
        }
    }

    /// Whether the operation has finished (does not consume the result)
    pub fn is_done(&self) -> bool {
        matches!(*self.shared.state.lock(), TaskState::Complete(_))
    }
}
