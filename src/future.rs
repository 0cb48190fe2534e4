//! Consumer-side handle.

use crate::error::{Exception, FutureError, Result};
use crate::state::{ChainLink, Shared};
use crate::status::{Progress, Status};
use crate::watcher::Watcher;
use core::fmt;
use std::sync::Arc;

/// A read-mostly view of a shared state.
///
/// Futures are cheap to clone; every clone observes the same state.
/// Status queries are snapshots taken under the state's lock. The
/// value-returning operations block until the requested value exists or
/// the state is terminal, and raise a stored producer failure as
/// [`FutureError::Exception`].
///
/// Continuation registration (`then`, `on_failed`, `on_canceled`, ...) lives
/// in [`crate::continuation`].
pub struct Future<T> {
    pub(crate) state: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Send + 'static> Future<T> {
    pub(crate) const fn from_state(state: Arc<Shared<T>>) -> Self {
        Self { state }
    }

    /// Snapshot of the status flags.
    #[must_use]
    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Returns true once the producer called `start()`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.status().contains(Status::STARTED)
    }

    /// Returns true between `start()` and `finish()`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status().contains(Status::RUNNING)
    }

    /// Returns true once the state finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status().contains(Status::FINISHED)
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.status().contains(Status::CANCELED)
    }

    /// Returns true while a suspend request waits for acknowledgement.
    #[must_use]
    pub fn is_suspending(&self) -> bool {
        self.status().contains(Status::SUSPENDING)
    }

    /// Returns true while the producer is paused.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.status().contains(Status::SUSPENDED)
    }

    /// Returns true while the throttle hint is set.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.status().contains(Status::THROTTLED)
    }

    /// Returns false once the future was canceled, or once its results were
    /// moved out with `take_result` or `take_results`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_canceled() && !self.state.results_taken()
    }

    /// Number of contiguous visible results starting at index 0.
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.state.result_count()
    }

    /// Returns true if a result is visible at `index`. Never blocks.
    #[must_use]
    pub fn is_result_ready_at(&self, index: usize) -> bool {
        self.state.is_result_ready_at(index)
    }

    /// Snapshot of the progress range, value and text.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.state.progress()
    }

    /// Current progress value.
    #[must_use]
    pub fn progress_value(&self) -> i32 {
        self.state.progress().value
    }

    /// The stored producer failure, if any. Never blocks.
    #[must_use]
    pub fn exception(&self) -> Option<Exception> {
        self.state.exception()
    }

    /// Requests cancellation.
    ///
    /// An unfinished state is marked canceled; the producer and every other
    /// future of the same state observe it. A finished state is left alone
    /// and the request travels down its continuation chain instead, to the
    /// first unfinished state on each branch. Upstream states and sibling
    /// chains are never affected.
    pub fn cancel(&self) {
        self.state.cancel_chain();
    }

    /// Blocks until the state is finished or canceled.
    ///
    /// Returns the stored failure, if any. Cancellation alone is not an
    /// error; query [`Future::is_canceled`].
    pub fn wait_for_finished(&self) -> Result<()> {
        self.state.wait_until_finished()
    }

    /// Asks the producer to pause at its next suspension point.
    pub fn suspend(&self) {
        self.state.request_suspend();
    }

    /// Clears a pending or acknowledged suspension.
    pub fn resume(&self) {
        self.state.resume();
    }

    /// Suspends or resumes.
    pub fn set_suspended(&self, suspend: bool) {
        if suspend {
            self.suspend();
        } else {
            self.resume();
        }
    }

    /// Resumes a suspending or suspended state, suspends any other.
    pub fn toggle_suspended(&self) {
        let suspended = self
            .status()
            .intersects(Status::SUSPENDING | Status::SUSPENDED);
        self.set_suspended(!suspended);
    }

    /// Sets or clears the cooperative throttle hint.
    pub fn set_throttled(&self, enable: bool) {
        self.state.set_throttled(enable);
    }

    /// Attaches a watcher. The current state is replayed to it first.
    pub fn watch(&self, watcher: Arc<dyn Watcher>) {
        self.state.watch(watcher);
    }

    /// Blocks until the state is terminal, then moves every result out.
    ///
    /// Later value-returning calls on any future of this state fail with
    /// [`FutureError::ResultsTaken`].
    pub fn take_results(&self) -> Result<Vec<T>> {
        self.state.take_results()
    }

    /// Blocks until the state is terminal, then moves the first result out
    /// and discards the rest.
    pub fn take_result(&self) -> Result<T> {
        self.state.take_result()
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Blocks until index `index` is visible or the state is terminal.
    ///
    /// # Errors
    ///
    /// - [`FutureError::Exception`] if the producer failed,
    /// - [`FutureError::Canceled`] if canceled without producing `index`,
    /// - [`FutureError::IndexOutOfRange`] if finished without it,
    /// - [`FutureError::ResultsTaken`] after `take_result(s)`.
    pub fn result_at(&self, index: usize) -> Result<T> {
        self.state.wait_for_result(index)
    }

    /// Equivalent to `result_at(0)`.
    pub fn result(&self) -> Result<T> {
        self.result_at(0)
    }

    /// Blocks until the state is terminal, then returns every visible
    /// result in index order.
    pub fn results(&self) -> Result<Vec<T>> {
        self.state.results()
    }

    /// Streams results as they become visible, without waiting for the
    /// producer to finish.
    #[must_use]
    pub fn iter(&self) -> ResultStream<T> {
        ResultStream {
            future: self.clone(),
            next: 0,
            done: false,
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("state", &self.state.id())
            .field("status", &self.status())
            .finish()
    }
}

impl<'a, T: Clone + Send + 'static> IntoIterator for &'a Future<T> {
    type Item = Result<T>;
    type IntoIter = ResultStream<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Blocking iterator over the visible results of a future.
///
/// Each step waits until the next result is visible or the state is
/// terminal. Once the producer has stored an exception, the next step yields
/// it and the stream ends; results not read before that point are never
/// returned.
pub struct ResultStream<T> {
    future: Future<T>,
    next: usize,
    done: bool,
}

impl<T: Clone + Send + 'static> ResultStream<T> {
    /// Blocks until another result is visible or the state is terminal.
    ///
    /// Returns true if [`Iterator::next`] would yield a value.
    pub fn has_next(&mut self) -> bool {
        if self.done {
            return false;
        }
        match self.future.state.wait_for_next(self.next) {
            Some(index) => {
                self.next = index;
                true
            }
            None => false,
        }
    }
}

impl<T: Clone + Send + 'static> Iterator for ResultStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.has_next() {
            let index = self.next;
            self.next += 1;
            let item = self.future.state.wait_for_result(index);
            if item.is_err() {
                self.done = true;
            }
            return Some(item);
        }
        if self.done {
            return None;
        }
        self.done = true;
        match self.future.exception() {
            Some(exception) => Some(Err(FutureError::Exception(exception))),
            None => None,
        }
    }
}

impl<T: Send + 'static> fmt::Debug for ResultStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("future", &self.future)
            .field("next", &self.next)
            .finish()
    }
}
