//! Thread pool executor.
//!
//! A set of OS threads draining a shared FIFO queue. It supports:
//!
//! - **Capacity management**: threads are spawned lazily up to
//!   `max_threads`; threads above `min_threads` retire after idling for
//!   `idle_timeout`
//! - **Panic isolation**: a panicking task is logged and its worker keeps
//!   serving the queue
//! - **Shutdown**: queued tasks still run; tasks submitted afterwards are
//!   dropped
//!
//! A dropped task drops whatever it owns. For continuation tasks that is the
//! downstream promise, which cancels and finishes the downstream future.

use crate::config::PoolConfig;
use crate::executor::{Executor, Task};
use crate::tracing_compat::{debug, trace, warn};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Executor backed by a dynamically sized set of worker threads.
///
/// ```
/// use fulfil::{run, ThreadPool};
/// use std::sync::Arc;
///
/// let pool = Arc::new(ThreadPool::new(1, 4));
/// let answer = run(pool.clone(), || 6 * 7);
/// assert_eq!(answer.result().unwrap(), 42);
/// ```
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    min_threads: usize,
    max_threads: usize,
    /// Threads alive, including ones parked on the condvar.
    active_threads: AtomicUsize,
    /// Threads currently running a task.
    busy_threads: AtomicUsize,
    /// Tasks queued but not yet picked up.
    pending_count: AtomicUsize,
    /// Monotonic suffix for thread names.
    next_thread_id: AtomicUsize,
    queue: SegQueue<Task>,
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
    idle_timeout: Duration,
    thread_name_prefix: String,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Creates a pool with the given thread limits and default naming.
    ///
    /// A `max_threads` of zero is raised to one, and to `min_threads` if
    /// that is larger.
    #[must_use]
    pub fn new(min_threads: usize, max_threads: usize) -> Self {
        Self::with_config(&PoolConfig {
            min_threads,
            max_threads,
            ..PoolConfig::default()
        })
    }

    /// Creates a pool from a resolved configuration.
    #[must_use]
    pub fn with_config(config: &PoolConfig) -> Self {
        let max_threads = config.max_threads.max(config.min_threads).max(1);
        let inner = Arc::new(PoolInner {
            min_threads: config.min_threads,
            max_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            next_thread_id: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            idle_timeout: config.idle_timeout,
            thread_name_prefix: config.thread_name_prefix.clone(),
            thread_handles: Mutex::new(Vec::with_capacity(max_threads)),
        });
        debug!(
            min_threads = inner.min_threads,
            max_threads = inner.max_threads,
            prefix = %inner.thread_name_prefix,
            "thread pool created"
        );

        for _ in 0..inner.min_threads {
            spawn_thread(&inner);
        }
        Self { inner }
    }

    /// Queues `f` for execution on a worker thread.
    ///
    /// Returns false, dropping `f`, if the pool is shut down.
    pub fn spawn<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(f))
    }

    fn push(&self, task: Task) -> bool {
        if self.is_shutdown() {
            warn!(prefix = %self.inner.thread_name_prefix, "task submitted after shutdown; dropped");
            return false;
        }
        self.inner.pending_count.fetch_add(1, Ordering::AcqRel);
        self.inner.queue.push(task);
        maybe_spawn_thread(&self.inner);
        self.inner.notify_one();
        true
    }

    /// Number of queued tasks not yet picked up.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Acquire)
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Acquire)
    }

    /// Number of workers currently running a task.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::Acquire)
    }

    /// Returns `true` once [`ThreadPool::shutdown`] was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting tasks. Queued tasks still run. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            debug!(prefix = %self.inner.thread_name_prefix, "thread pool shutting down");
        }
        self.inner.notify_all();
    }

    /// Shuts down and waits up to `timeout` for every worker to exit.
    ///
    /// Returns `true` if all workers exited in time.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now() + timeout;
        let own_worker = usize::from(self.is_worker_thread());
        while self.inner.active_threads.load(Ordering::Acquire) > own_worker {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.inner.notify_all();
            thread::sleep(Duration::from_millis(10).min(remaining));
        }

        let current = thread::current().id();
        let handles: Vec<_> = self.inner.thread_handles.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        true
    }

    /// Returns true if the calling thread is one of this pool's workers.
    fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.inner
            .thread_handles
            .lock()
            .iter()
            .any(|handle| handle.thread().id() == current)
    }
}

impl Executor for ThreadPool {
    fn submit(&self, task: Task) {
        self.push(task);
    }

    fn is_idle(&self) -> bool {
        self.pending_count() == 0 && self.busy_threads() == 0
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::with_config(&PoolConfig::default())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
        // the last reference may be released by one of our own workers
        if self.is_worker_thread() {
            return;
        }
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_threads", &self.active_threads())
            .field("busy_threads", &self.busy_threads())
            .field("pending_tasks", &self.pending_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl PoolInner {
    fn notify_one(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    /// Drops a retiring worker's handle, detaching it.
    fn release_handle(&self, worker: ThreadId) {
        self.thread_handles
            .lock()
            .retain(|handle| handle.thread().id() != worker);
    }
}

#[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
fn spawn_thread(inner: &Arc<PoolInner>) {
    let worker = Arc::clone(inner);
    let thread_id = inner.next_thread_id.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-{}", inner.thread_name_prefix, thread_id);
    inner.active_threads.fetch_add(1, Ordering::AcqRel);

    let spawned = thread::Builder::new().name(name).spawn(move || {
        trace!("pool worker started");
        worker_loop(&worker);
        worker.release_handle(thread::current().id());
        worker.active_threads.fetch_sub(1, Ordering::AcqRel);
        trace!("pool worker exited");
    });
    match spawned {
        Ok(handle) => {
            let mut handles = inner.thread_handles.lock();
            // a worker that retired before its handle landed here
            handles.retain(|existing| !existing.is_finished());
            handles.push(handle);
        }
        Err(err) => {
            inner.active_threads.fetch_sub(1, Ordering::AcqRel);
            warn!(error = %err, "failed to spawn pool worker");
        }
    }
}

/// Spawns a worker if more tasks are waiting than workers are idle.
fn maybe_spawn_thread(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::Acquire);
    let busy = inner.busy_threads.load(Ordering::Acquire);
    let pending = inner.pending_count.load(Ordering::Acquire);
    if active < inner.max_threads && pending > active.saturating_sub(busy) {
        spawn_thread(inner);
    }
}

#[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(task) = inner.queue.pop() {
            inner.busy_threads.fetch_add(1, Ordering::AcqRel);
            inner.pending_count.fetch_sub(1, Ordering::AcqRel);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                let message = crate::error::PanicError::from_payload(payload.as_ref());
                warn!(panic = %message, "pool task panicked");
            }
            inner.busy_threads.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut guard = inner.mutex.lock();
        // re-check under the lock so a push between pop and park is not lost
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        if inner.active_threads.load(Ordering::Acquire) > inner.min_threads {
            let timed_out = inner
                .condvar
                .wait_for(&mut guard, inner.idle_timeout)
                .timed_out();
            if timed_out
                && inner.queue.is_empty()
                && inner.active_threads.load(Ordering::Acquire) > inner.min_threads
            {
                break;
            }
        } else {
            inner.condvar.wait(&mut guard);
        }
    }
}
