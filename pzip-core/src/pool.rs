//! Bounded worker pool with first-error-stops-all semantics.
//!
//! A fixed set of OS threads serves a bounded FIFO queue. `enqueue` blocks
//! while the queue is full; workers block while it is empty. The first
//! executor error is recorded, the pool cancels itself so sibling workers
//! drain and exit, and the error is surfaced from [`WorkerPool::close`].
//!
//! Cancellation is observed between tasks: a running executor is never
//! interrupted mid-task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::error::{PzipError, Result};

/// Resolve a worker count of 0 to the machine's hardware parallelism.
pub fn resolve_concurrency(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

struct State<T> {
    queue: VecDeque<T>,
    shutdown: bool,
    cancelled: bool,
    first_error: Option<PzipError>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    task_available: Condvar,
    space_available: Condvar,
    capacity: usize,
    executor: Box<dyn Fn(T) -> Result<()> + Send + Sync>,
}

/// A bounded-capacity task queue served by a fixed set of worker threads.
///
/// Tasks come off the queue in FIFO order but may complete in any order;
/// with a single worker, FIFO is preserved end-to-end.
pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    concurrency: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool.
    ///
    /// `concurrency` of 0 means hardware parallelism; `capacity` bounds the
    /// queue length. Workers are not spawned until [`start`](Self::start).
    pub fn new<F>(executor: F, concurrency: usize, capacity: usize) -> Self
    where
        F: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    shutdown: false,
                    cancelled: false,
                    first_error: None,
                }),
                task_available: Condvar::new(),
                space_available: Condvar::new(),
                capacity: capacity.max(1),
                executor: Box::new(executor),
            }),
            workers: Mutex::new(Vec::new()),
            concurrency: resolve_concurrency(concurrency),
        }
    }

    /// Number of workers this pool spawns.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Spawn the worker threads. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for _ in 0..self.concurrency {
            let shared = Arc::clone(&self.shared);
            workers.push(thread::spawn(move || worker_loop(&shared)));
        }
    }

    /// Add a task, blocking while the queue is full.
    ///
    /// Returns immediately (dropping the task) once the pool is shut down
    /// or cancelled.
    pub fn enqueue(&self, task: T) {
        let mut state = self.shared.state.lock();
        while state.queue.len() >= self.shared.capacity && !state.shutdown && !state.cancelled {
            self.shared.space_available.wait(&mut state);
        }
        if state.shutdown || state.cancelled {
            return;
        }
        state.queue.push_back(task);
        self.shared.task_available.notify_one();
    }

    /// Mark shutdown, wake all workers, join them, and return the first
    /// error recorded (or [`PzipError::Cancelled`] after a cancellation).
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.task_available.notify_all();
        self.shared.space_available.notify_all();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        let mut state = self.shared.state.lock();
        match state.first_error.take() {
            Some(err) => Err(err),
            None if state.cancelled => Err(PzipError::Cancelled),
            None => Ok(()),
        }
    }

    /// Mark cancelled, drain the queue, and wake everyone.
    ///
    /// In-flight tasks run to completion; queued tasks are dropped.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state.lock();
            state.cancelled = true;
            state.queue.clear();
        }
        self.shared.task_available.notify_all();
        self.shared.space_available.notify_all();
    }

    /// Number of tasks waiting in the queue.
    pub fn pending_tasks(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.cancelled = true;
            state.queue.clear();
        }
        self.shared.task_available.notify_all();
        self.shared.space_available.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<T: Send + 'static>(shared: &Shared<T>) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if state.cancelled || (state.shutdown && state.queue.is_empty()) {
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    shared.space_available.notify_one();
                    break task;
                }
                shared.task_available.wait(&mut state);
            }
        };

        if let Err(err) = (shared.executor)(task) {
            let mut state = shared.state.lock();
            if state.first_error.is_none() {
                state.first_error = Some(err);
            }
            state.cancelled = true;
            state.queue.clear();
            drop(state);
            shared.task_available.notify_all();
            shared.space_available.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_pool_runs_all_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool = WorkerPool::new(
            move |n: usize| {
                c.fetch_add(n, Ordering::SeqCst);
                Ok(())
            },
            4,
            8,
        );
        pool.start();
        for i in 1..=100 {
            pool.enqueue(i);
        }
        pool.close().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5050);
    }

    #[test]
    fn test_pool_single_worker_is_fifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        let pool = WorkerPool::new(
            move |n: usize| {
                o.lock().push(n);
                Ok(())
            },
            1,
            4,
        );
        pool.start();
        for i in 0..50 {
            pool.enqueue(i);
        }
        pool.close().unwrap();
        assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_first_error_stops_all() {
        let executed = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&executed);
        let pool = WorkerPool::new(
            move |n: usize| {
                if n == 3 {
                    return Err(PzipError::write("disk full"));
                }
                e.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            1,
            4,
        );
        pool.start();
        for i in 0..100 {
            pool.enqueue(i);
        }
        let err = pool.close().unwrap_err();
        assert!(matches!(err, PzipError::Write { .. }));
        // Everything after the failing task was dropped by cancellation.
        assert!(executed.load(Ordering::SeqCst) < 100);
    }

    #[test]
    fn test_pool_cancel_reports_cancelled() {
        let pool = WorkerPool::new(|_: usize| Ok(()), 2, 4);
        pool.start();
        pool.cancel();
        pool.enqueue(1); // returns immediately, task dropped
        assert!(matches!(pool.close(), Err(PzipError::Cancelled)));
    }

    #[test]
    fn test_pool_zero_concurrency_uses_hardware() {
        let pool = WorkerPool::new(|_: usize| Ok(()), 0, 1);
        assert!(pool.concurrency() >= 1);
    }
}
