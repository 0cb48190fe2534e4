//! Running closures on an executor and observing them through a future.

use crate::error::Exception;
use crate::executor::{ExecutionPolicy, Executor};
use crate::future::Future;
use crate::promise::Promise;
use crate::state::is_void;
use crate::tracing_compat::debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Runs `f` on `executor`; its return value becomes the future's result.
///
/// A panic inside `f` is stored as a [`PanicError`](crate::PanicError)
/// exception. Continuations registered with [`ExecutionPolicy::Inherit`]
/// on the returned future run on the same executor.
pub fn run<T, F>(executor: Arc<dyn Executor>, f: F) -> Future<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    run_with_promise(executor, move |promise: &Promise<T>| {
        let value = f();
        if !is_void::<T>() {
            promise.report_result(value);
        }
    })
}

/// Runs `f` on `executor` with the producing promise, for closures that
/// report several results, progress, or honor cancellation and suspension.
///
/// The promise is started before `f` is submitted and finished after it
/// returns.
///
/// ```
/// use fulfil::{run_with_promise, ThreadPool};
/// use std::sync::Arc;
///
/// let pool = Arc::new(ThreadPool::new(1, 2));
/// let squares = run_with_promise(pool, |promise| {
///     for i in 0..4 {
///         if promise.is_canceled() {
///             return;
///         }
///         promise.report_result(i * i);
///     }
/// });
/// assert_eq!(squares.results().unwrap(), vec![0, 1, 4, 9]);
/// ```
pub fn run_with_promise<T, F>(executor: Arc<dyn Executor>, f: F) -> Future<T>
where
    T: Send + 'static,
    F: FnOnce(&Promise<T>) + Send + 'static,
{
    let promise = Promise::with_policy(ExecutionPolicy::ThreadPool(Arc::clone(&executor)));
    let future = promise.future();
    promise.start();
    debug!(state = future.state.id(), "submitting run task");
    executor.submit(Box::new(move || {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(&promise))) {
            promise.report_exception(Exception::from_panic(payload));
        }
        promise.finish();
    }));
    future
}
