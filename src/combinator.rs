//! Aggregating several futures into one.

use crate::future::Future;
use crate::promise::Promise;
use crate::ready::{make_canceled_future, make_ready_future};
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The first input of [`when_any`] to finish.
#[derive(Debug)]
pub struct WhenAny<T: Send + 'static> {
    /// Position of the input in the sequence handed to `when_any`.
    pub index: usize,
    /// The finished input.
    pub future: Future<T>,
}

impl<T: Send + 'static> Clone for WhenAny<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            future: self.future.clone(),
        }
    }
}

struct Gather<T: Send + 'static> {
    promise: Mutex<Option<Promise<Vec<Future<T>>>>>,
    remaining: AtomicUsize,
    inputs: Vec<Future<T>>,
}

impl<T: Send + 'static> Gather<T> {
    fn input_finished(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if let Some(promise) = self.promise.lock().take() {
            promise.report_result(self.inputs.clone());
            promise.finish();
        }
    }
}

/// Resolves once every input has finished, with the inputs in their
/// original order.
///
/// Failed and canceled inputs count as finished; inspect each one for its
/// outcome. An empty input resolves immediately with an empty list.
pub fn when_all<T, I>(futures: I) -> Future<Vec<Future<T>>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let inputs: Vec<Future<T>> = futures.into_iter().collect();
    if inputs.is_empty() {
        return make_ready_future(Vec::new());
    }

    let promise = Promise::new();
    promise.start();
    let output = promise.future();
    trace!(state = output.state.id(), inputs = inputs.len(), "when_all");
    let gather = Arc::new(Gather {
        promise: Mutex::new(Some(promise)),
        remaining: AtomicUsize::new(inputs.len()),
        inputs,
    });
    for input in &gather.inputs {
        let gather_ref = Arc::clone(&gather);
        let pending = input
            .state
            .add_continuation(Box::new(move |_| gather_ref.input_finished()));
        if let Some(resolve) = pending {
            resolve(Arc::clone(&input.state));
        }
    }
    output
}

/// Resolves with the first input to finish.
///
/// An empty input yields a canceled, finished future.
pub fn when_any<T, I>(futures: I) -> Future<WhenAny<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let inputs: Vec<Future<T>> = futures.into_iter().collect();
    if inputs.is_empty() {
        return make_canceled_future();
    }

    let promise = Promise::new();
    promise.start();
    let output = promise.future();
    trace!(state = output.state.id(), inputs = inputs.len(), "when_any");
    let winner = Arc::new(Mutex::new(Some(promise)));
    for (index, input) in inputs.into_iter().enumerate() {
        let winner = Arc::clone(&winner);
        let future = input.clone();
        let pending = input.state.add_continuation(Box::new(move |_| {
            if let Some(promise) = winner.lock().take() {
                promise.report_result(WhenAny { index, future });
                promise.finish();
            }
        }));
        if let Some(resolve) = pending {
            resolve(Arc::clone(&input.state));
        }
    }
    output
}
