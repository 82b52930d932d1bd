//! Serialized background task queue
//!
//! Sync jobs mutate the same trees and the same persisted state, so
//! they must never overlap. The queue runs exactly one job at a time
//! on a driver thread and lets callers tag jobs with a key so
//! duplicates can be dropped while an identical job is still queued or
//! running.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

/// How often the driver rechecks for a finished job or new work.
const DRIVER_RECHECK: Duration = Duration::from_millis(500);

/// One unit of queued work.
pub struct Task {
    key: Option<String>,
    job: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    /// An anonymous task.
    #[must_use]
    pub fn new(job: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: None,
            job: Box::new(job),
        }
    }

    /// A task tagged with a deduplication key.
    #[must_use]
    pub fn keyed(key: impl Into<String>, job: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: Some(key.into()),
            job: Box::new(job),
        }
    }
}

struct Running {
    key: Option<String>,
    handle: JoinHandle<()>,
}

struct Inner {
    pool: VecDeque<Task>,
    current: Option<Running>,
    driver_alive: bool,
}

/// FIFO queue executing at most one task at a time.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Mutex<Inner>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Create an empty queue. The driver thread starts lazily on the
    /// first push and exits once the queue drains.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pool: VecDeque::new(),
                current: None,
                driver_alive: false,
            })),
        }
    }

    /// Enqueue a task.
    pub fn push(&self, task: Task) {
        let mut inner = self.lock();
        trace!(key = ?task.key, queued = inner.pool.len(), "task enqueued");
        inner.pool.push_back(task);
        if !inner.driver_alive {
            inner.driver_alive = true;
            let queue = self.clone();
            thread::spawn(move || queue.drive());
        }
    }

    /// Whether a task with this key is queued or still running.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let inner = self.lock();
        if inner.pool.iter().any(|t| t.key.as_deref() == Some(key)) {
            return true;
        }
        inner
            .current
            .as_ref()
            .is_some_and(|r| r.key.as_deref() == Some(key) && !r.handle.is_finished())
    }

    /// Whether the queue is empty with no job running.
    #[cfg(test)]
    fn is_idle(&self) -> bool {
        let inner = self.lock();
        inner.pool.is_empty()
            && inner
                .current
                .as_ref()
                .is_none_or(|r| r.handle.is_finished())
    }

    fn drive(&self) {
        loop {
            {
                let mut inner = self.lock();
                if inner
                    .current
                    .as_ref()
                    .is_some_and(|r| r.handle.is_finished())
                {
                    inner.current = None;
                }
                if inner.current.is_none() {
                    match inner.pool.pop_front() {
                        Some(task) => {
                            debug!(key = ?task.key, "task started");
                            let handle = thread::spawn(task.job);
                            inner.current = Some(Running {
                                key: task.key,
                                handle,
                            });
                        }
                        None => {
                            inner.driver_alive = false;
                            return;
                        }
                    }
                }
            }
            thread::sleep(DRIVER_RECHECK);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicked job must not wedge the queue for every later sync
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;

    fn wait_idle(queue: &TaskQueue, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while !queue.is_idle() {
            assert!(Instant::now() < deadline, "queue did not drain in time");
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_tasks_run_in_order_without_overlap() {
        let queue = TaskQueue::new();
        let busy = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let busy = Arc::clone(&busy);
            let overlapped = Arc::clone(&overlapped);
            let done = Arc::clone(&done);
            queue.push(Task::new(move || {
                if busy.swap(true, Ordering::SeqCst) {
                    overlapped.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(100));
                busy.store(false, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        wait_idle(&queue, Duration::from_secs(10));
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_has_sees_queued_and_running_keys() {
        let queue = TaskQueue::new();
        let release = Arc::new(AtomicBool::new(false));

        {
            let release = Arc::clone(&release);
            queue.push(Task::keyed("long-job", move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(10));
                }
            }));
        }

        // Still visible while queued, then while running
        assert!(queue.has("long-job"));
        thread::sleep(Duration::from_millis(100));
        assert!(queue.has("long-job"));
        assert!(!queue.has("other-job"));

        release.store(true, Ordering::SeqCst);
        wait_idle(&queue, Duration::from_secs(10));
        assert!(!queue.has("long-job"));
    }

    #[test]
    fn test_driver_restarts_after_drain() {
        let queue = TaskQueue::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        queue.push(Task::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        wait_idle(&queue, Duration::from_secs(10));

        let c = Arc::clone(&count);
        queue.push(Task::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        wait_idle(&queue, Duration::from_secs(10));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
