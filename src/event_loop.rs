//! Single-thread execution context.
//!
//! An [`EventLoop`] owns one thread that runs posted closures in FIFO order.
//! It is the [`Context`] for context-affine continuations: a continuation
//! registered with `ExecutionPolicy::Context(event_loop)` always runs on the
//! loop's thread, delivered asynchronously relative to whichever thread
//! resolved the upstream.

use crate::executor::{Context, Task};
use crate::tracing_compat::{debug, warn};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle, ThreadId};

/// A dedicated thread draining a queue of posted closures.
///
/// Stopping the loop lets it finish everything already queued; closures
/// posted afterwards are dropped.
pub struct EventLoop {
    sender: Mutex<Option<Sender<Task>>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Starts a loop on a thread named `fulfil-event-loop`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn new() -> io::Result<Self> {
        Self::with_name("fulfil-event-loop")
    }

    /// Starts a loop on a thread with the given name.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    pub fn with_name(name: impl Into<String>) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            for task in receiver {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    let message = crate::error::PanicError::from_payload(payload.as_ref());
                    warn!(panic = %message, "event loop task panicked");
                }
            }
            debug!("event loop drained");
        })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Returns true until [`EventLoop::stop`] is called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stops accepting closures. Already queued ones still run.
    pub fn stop(&self) {
        self.sender.lock().take();
    }

    /// Stops the loop and waits for its thread to drain and exit.
    ///
    /// Does not wait when called from the loop's own thread.
    pub fn join(&self) {
        self.stop();
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Context for EventLoop {
    fn owning_thread(&self) -> ThreadId {
        self.thread_id
    }

    fn post(&self, task: Task) {
        let sender = self.sender.lock();
        let rejected = match sender.as_ref() {
            Some(sender) => sender.send(task).is_err(),
            None => true,
        };
        if rejected {
            warn!("closure posted to a stopped event loop; dropped");
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.join();
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("thread", &self.thread_id)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn posted_closures_run_on_owning_thread_in_order() {
        init_test_logging();
        let event_loop = EventLoop::new().expect("spawn event loop");
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            event_loop.post(Box::new(move || {
                let _ = tx.send((i, thread::current().id()));
            }));
        }
        drop(tx);
        let seen: Vec<_> = rx.iter().collect();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(_, id)| *id == event_loop.owning_thread()));
        assert_ne!(event_loop.owning_thread(), thread::current().id());
    }

    #[test]
    fn stop_drains_queue_then_drops_new_posts() {
        init_test_logging();
        let event_loop = EventLoop::with_name("drain-test").expect("spawn event loop");
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            event_loop.post(Box::new(move || {
                thread::sleep(Duration::from_millis(5));
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        event_loop.stop();
        assert!(!event_loop.is_running());

        let late = Arc::clone(&ran);
        event_loop.post(Box::new(move || {
            late.fetch_add(100, Ordering::SeqCst);
        }));
        event_loop.join();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_closure_does_not_stop_the_loop() {
        init_test_logging();
        let event_loop = EventLoop::new().expect("spawn event loop");
        event_loop.post(Box::new(|| panic!("intentional panic")));
        let (tx, rx) = mpsc::channel();
        event_loop.post(Box::new(move || {
            let _ = tx.send(());
        }));
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
