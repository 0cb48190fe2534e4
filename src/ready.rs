//! Futures that are finished at construction.

use crate::error::Exception;
use crate::future::Future;
use crate::promise::Promise;

fn finished<T: Send + 'static>(fill: impl FnOnce(&Promise<T>)) -> Future<T> {
    let promise = Promise::new();
    promise.start();
    fill(&promise);
    promise.finish();
    promise.future()
}

/// A finished future holding `value`.
pub fn make_ready_future<T: Send + 'static>(value: T) -> Future<T> {
    finished(|promise| {
        promise.report_result(value);
    })
}

/// A finished future holding `values` at indices `0..values.len()`.
pub fn make_ready_results<T: Send + 'static>(values: Vec<T>) -> Future<T> {
    finished(|promise| {
        if !values.is_empty() {
            promise.report_results(values);
        }
    })
}

/// A finished, result-less `Future<()>`.
#[must_use]
pub fn make_ready_void() -> Future<()> {
    finished(|_| {})
}

/// A finished future carrying `error`.
pub fn make_exceptional_future<T: Send + 'static>(error: impl Into<Exception>) -> Future<T> {
    let exception = error.into();
    finished(|promise| {
        promise.report_exception(exception);
    })
}

/// A canceled, finished future.
#[must_use]
pub fn make_canceled_future<T: Send + 'static>() -> Future<T> {
    let promise = Promise::new();
    let future = promise.future();
    promise.start();
    future.cancel();
    promise.finish();
    future
}
