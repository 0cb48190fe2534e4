//! Producer-side handle.

use crate::error::Exception;
use crate::executor::ExecutionPolicy;
use crate::future::Future;
use crate::state::Shared;
use crate::status::Status;
use crate::tracing_compat::trace;
use core::fmt;
use std::sync::Arc;

/// Writes results, progress and the final status into a shared state.
///
/// A promise is the only writer of its state and is not `Clone`. Every
/// [`Future`] obtained through [`Promise::future`] observes the same state.
///
/// Dropping a promise whose state has not finished cancels and finishes the
/// state, so blocked consumers wake up and continuations resolve through
/// their cancellation path.
///
/// ```
/// use fulfil::Promise;
///
/// let promise = Promise::new();
/// let future = promise.future();
/// promise.start();
/// promise.report_result(1);
/// promise.report_result(2);
/// promise.finish();
/// assert_eq!(future.results().unwrap(), vec![1, 2]);
/// ```
pub struct Promise<T: Send + 'static> {
    state: Arc<Shared<T>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Creates a promise whose continuations inherit the inline policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(ExecutionPolicy::Inline)
    }

    /// Creates a promise tagged with `policy`, which `Inherit`
    /// continuations registered on its future fall back to.
    pub(crate) fn with_policy(policy: ExecutionPolicy) -> Self {
        let policy = policy.resolve(&ExecutionPolicy::Inline);
        Self {
            state: Shared::new(policy),
        }
    }

    /// Returns a future observing this promise's state.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        Future::from_state(Arc::clone(&self.state))
    }

    /// Marks the state started and running. A second call does nothing.
    pub fn start(&self) {
        self.state.start();
    }

    /// Marks the state finished, wakes every waiter and resolves the
    /// continuations registered on it.
    pub fn finish(&self) {
        self.state.finish();
    }

    /// Enables filter mode on the result store.
    ///
    /// Call before reporting any result.
    pub fn set_filter_mode(&self, enable: bool) {
        self.state.set_filter_mode(enable);
    }

    /// Appends a result at the next sequential index.
    ///
    /// Returns false if the state is finished or canceled.
    pub fn report_result(&self, value: T) -> bool {
        self.state.report_result(None, value)
    }

    /// Stores a result at `index`. Returns false if the index is occupied
    /// or the state is finished or canceled.
    pub fn report_result_at(&self, index: usize, value: T) -> bool {
        self.state.report_result(Some(index), value)
    }

    /// Appends a batch of results at contiguous indices.
    pub fn report_results(&self, values: Vec<T>) -> bool {
        self.state.report_results(None, values)
    }

    /// Stores a batch at contiguous indices starting at `index`.
    pub fn report_results_at(&self, index: usize, values: Vec<T>) -> bool {
        self.state.report_results(Some(index), values)
    }

    /// Marks `count` filter-mode slots starting at `index` as permanently
    /// absent, letting later results move down into the gap.
    pub fn report_canceled_results(&self, index: usize, count: usize) -> bool {
        self.state.report_canceled_results(index, count)
    }

    /// Stores the first failure of this computation.
    ///
    /// Later failures, and failures reported after finish or cancel, are
    /// dropped. The failure is raised to consumers when they ask for a value.
    pub fn report_exception(&self, error: impl Into<Exception>) -> bool {
        self.state.report_exception(error.into())
    }

    /// Sets the progress range. The current value is clamped into it.
    pub fn set_progress_range(&self, minimum: i32, maximum: i32) {
        self.state.set_progress_range(minimum, maximum);
    }

    /// Reports a progress value. Backwards moves are ignored.
    pub fn report_progress(&self, value: i32) -> bool {
        self.state.report_progress(value, None)
    }

    /// Reports a progress value together with a status text.
    pub fn report_progress_text(&self, value: i32, text: &str) -> bool {
        self.state.report_progress(value, Some(text))
    }

    /// Returns true once a consumer canceled the computation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.future().is_canceled()
    }

    /// Returns true while a consumer asks the producer to pause.
    #[must_use]
    pub fn is_suspend_requested(&self) -> bool {
        self.future().is_suspending()
    }

    /// Returns true while consumers ask for slower reporting.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.future().is_throttled()
    }

    /// Acknowledges a pending suspend request without blocking.
    pub fn acknowledge_suspended(&self) -> bool {
        self.state.acknowledge_suspended()
    }

    /// Acknowledges a pending suspend request and blocks until the
    /// computation is resumed or canceled. Returns immediately otherwise.
    pub fn suspend_if_requested(&self) {
        self.state.suspend_if_requested();
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.state.status().contains(Status::FINISHED) {
            return;
        }
        trace!(state = self.state.id(), "promise dropped unfinished");
        self.state.request_cancel();
        self.state.finish();
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state.id())
            .field("status", &self.state.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::FutureError;

    #[test]
    fn unstarted_promise_is_pending() {
        init_test_logging();
        let promise = Promise::<i32>::new();
        let future = promise.future();
        assert!(!future.is_started());
        assert!(!future.is_running());
        promise.start();
        assert!(future.is_started());
        assert!(future.is_running());
    }

    #[test]
    fn indexed_and_batched_reports() {
        init_test_logging();
        let promise = Promise::new();
        let future = promise.future();
        promise.start();
        assert!(promise.report_result_at(2, 'c'));
        assert!(!promise.report_result_at(2, 'x'));
        assert!(promise.report_results_at(0, vec!['a', 'b']));
        assert!(promise.report_result('d'));
        assert!(!promise.report_results(Vec::new()));
        promise.finish();
        assert_eq!(future.results().ok(), Some(vec!['a', 'b', 'c', 'd']));
    }

    #[test]
    fn filter_mode_renumbers_around_canceled_slots() {
        init_test_logging();
        let promise = Promise::new();
        promise.set_filter_mode(true);
        let future = promise.future();
        promise.start();
        promise.report_result_at(0, 10);
        promise.report_result_at(2, 30);
        assert_eq!(future.result_count(), 1);
        assert!(promise.report_canceled_results(1, 1));
        assert_eq!(future.result_count(), 2);
        assert_eq!(future.result_at(1).ok(), Some(30));
        promise.finish();
    }

    #[test]
    fn drop_unfinished_cancels_and_finishes() {
        init_test_logging();
        let promise = Promise::<i32>::new();
        let future = promise.future();
        promise.start();
        promise.report_result(1);
        drop(promise);
        assert!(future.is_canceled());
        assert!(future.is_finished());
        assert_eq!(future.results().ok(), Some(vec![1]));
    }

    #[test]
    fn drop_after_finish_keeps_status() {
        init_test_logging();
        let promise = Promise::<i32>::new();
        let future = promise.future();
        promise.start();
        promise.finish();
        drop(promise);
        assert!(future.is_finished());
        assert!(!future.is_canceled());
    }

    #[test]
    fn exception_raised_at_consumption() {
        init_test_logging();
        let promise = Promise::<i32>::new();
        let future = promise.future();
        promise.start();
        assert!(promise.report_exception(crate::PanicError::new("first")));
        assert!(!promise.report_exception(crate::PanicError::new("second")));
        promise.finish();

        match future.result() {
            Err(FutureError::Exception(e)) => assert_eq!(e.to_string(), "panic: first"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn consumer_signals_are_visible_to_producer() {
        init_test_logging();
        let promise = Promise::<i32>::new();
        let future = promise.future();
        promise.start();

        future.set_throttled(true);
        assert!(promise.is_throttled());

        future.suspend();
        assert!(promise.is_suspend_requested());
        assert!(promise.acknowledge_suspended());
        assert!(future.is_suspended());
        future.resume();
        // nothing pending: returns at once
        promise.suspend_if_requested();

        future.cancel();
        assert!(promise.is_canceled());
        assert!(!promise.report_result(1));
    }

    #[test]
    fn progress_reports() {
        init_test_logging();
        let promise = Promise::<()>::new();
        let future = promise.future();
        promise.start();
        promise.set_progress_range(0, 100);
        assert!(promise.report_progress(40));
        assert!(!promise.report_progress(20));
        assert!(promise.report_progress_text(60, "copying"));
        let progress = future.progress();
        assert_eq!((progress.minimum, progress.maximum), (0, 100));
        assert_eq!(progress.value, 60);
        assert_eq!(progress.text.as_deref(), Some("copying"));
        promise.finish();
        assert!(!promise.report_progress(90));
        assert_eq!(future.progress_value(), 60);
    }
}
