//! Continuation scheduling.
//!
//! Every registration method on [`Future`] creates a fresh downstream state,
//! starts it at once, and queues a link on the upstream. When the upstream
//! finishes (or immediately, if it already has) the link resolves:
//!
//! | upstream                 | `then*`        | `on_failed*`       | `on_canceled*` |
//! |--------------------------|----------------|--------------------|----------------|
//! | exception stored         | propagate¹     | handler if matched | propagate      |
//! | canceled, no exception   | cancel         | cancel             | handler        |
//! | finished normally        | callback       | pass results       | pass results   |
//!
//! ¹ `then_future` callbacks run instead, receiving the failed future.
//!
//! A stored exception takes precedence over cancellation. Callback return
//! values become the downstream result; `Err` returns and panics become the
//! downstream exception. A callback returning `()` leaves the downstream
//! result-less.
//!
//! Where the callback runs is chosen by the link's [`ExecutionPolicy`];
//! methods without a policy argument run inline on the resolving thread.
//! The upstream keeps the downstream alive only until the link resolves;
//! once it has, nothing but caller-held futures references the downstream
//! or the closures it captured.

use crate::error::{Exception, FutureError};
use crate::executor::ExecutionPolicy;
use crate::future::Future;
use crate::promise::Promise;
use crate::state::{is_void, void_value, ChainLink, Continuation};
use crate::tracing_compat::debug;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// How the upstream of a link ended.
enum Upstream {
    Failed(Exception),
    Canceled,
    Completed,
}

impl Upstream {
    fn of<T: Send + 'static>(future: &Future<T>) -> Self {
        if let Some(exception) = future.exception() {
            Self::Failed(exception)
        } else if future.is_canceled() {
            Self::Canceled
        } else {
            Self::Completed
        }
    }
}

/// Registers a link resolving `body` off `upstream` under `policy`.
#[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
fn attach<T, R, F>(upstream: &Future<T>, policy: ExecutionPolicy, body: F) -> Future<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce(Future<T>, Promise<R>) + Send + 'static,
{
    let policy = policy.resolve(upstream.state.policy());
    let promise = Promise::with_policy(policy.clone());
    promise.start();
    let downstream = promise.future();

    let link: Arc<dyn ChainLink> = downstream.state.clone();
    upstream.state.add_downstream(Arc::downgrade(&link));

    let downstream_id = downstream.state.id();
    let node: Continuation<T> = Box::new(move |state| {
        debug!(
            upstream = state.id(),
            downstream = downstream_id,
            policy = policy.name(),
            "resolving continuation"
        );
        let future = Future::from_state(state);
        policy.dispatch(Box::new(move || body(future, promise)));
    });
    if let Some(node) = upstream.state.add_continuation(node) {
        node(Arc::clone(&upstream.state));
    }
    downstream
}

/// Runs a callback, turning panics into exceptions.
fn invoke<R>(callback: impl FnOnce() -> Result<R, Exception>) -> Result<R, Exception> {
    panic::catch_unwind(AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| Err(Exception::from_panic(payload)))
}

/// Publishes a callback outcome into the downstream and finishes it.
fn settle<R: Send + 'static>(promise: &Promise<R>, outcome: Result<R, Exception>) {
    match outcome {
        Ok(value) => {
            if !is_void::<R>() {
                promise.report_result(value);
            }
        }
        Err(exception) => {
            promise.report_exception(exception);
        }
    }
    promise.finish();
}

fn fail<R: Send + 'static>(promise: &Promise<R>, exception: Exception) {
    promise.report_exception(exception);
    promise.finish();
}

fn cancel<R: Send + 'static>(promise: &Promise<R>) {
    promise.future().state.request_cancel();
    promise.finish();
}

/// Copies the upstream's results into the downstream unchanged.
fn pass_through<T: Clone + Send + 'static>(upstream: &Future<T>, promise: &Promise<T>) {
    let values = upstream.state.visible_results();
    if !values.is_empty() {
        promise.report_results(values);
    }
    promise.finish();
}

/// The value handed to value continuations.
///
/// Result-less `Future<()>` states yield `()`. Any other type without a
/// result at index 0 is an error.
fn first_value<T: Clone + Send + 'static>(upstream: &Future<T>) -> Result<T, Exception> {
    upstream
        .state
        .first_result()
        .or_else(void_value::<T>)
        .ok_or_else(|| {
            Exception::new(FutureError::IndexOutOfRange {
                index: 0,
                count: upstream.result_count(),
            })
        })
}

impl<T: Send + 'static> Future<T> {
    /// Runs `f` with the first result once this future finishes.
    ///
    /// ```
    /// use fulfil::make_ready_future;
    ///
    /// let doubled = make_ready_future(5).then(|x| x + 1).then(|y| y * 2);
    /// assert_eq!(doubled.result().unwrap(), 12);
    /// ```
    pub fn then<R, F>(&self, f: F) -> Future<R>
    where
        T: Clone,
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.then_with(ExecutionPolicy::Inline, f)
    }

    /// [`Future::then`] under an explicit execution policy.
    pub fn then_with<R, F>(&self, policy: ExecutionPolicy, f: F) -> Future<R>
    where
        T: Clone,
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.try_then_with(policy, move |value| Ok::<R, Exception>(f(value)))
    }

    /// Runs a fallible `f` with the first result; `Err` becomes the
    /// downstream exception.
    pub fn try_then<R, E, F>(&self, f: F) -> Future<R>
    where
        T: Clone,
        R: Send + 'static,
        E: Into<Exception>,
        F: FnOnce(T) -> Result<R, E> + Send + 'static,
    {
        self.try_then_with(ExecutionPolicy::Inline, f)
    }

    /// [`Future::try_then`] under an explicit execution policy.
    pub fn try_then_with<R, E, F>(&self, policy: ExecutionPolicy, f: F) -> Future<R>
    where
        T: Clone,
        R: Send + 'static,
        E: Into<Exception>,
        F: FnOnce(T) -> Result<R, E> + Send + 'static,
    {
        attach(self, policy, move |upstream, promise| match Upstream::of(&upstream) {
            Upstream::Failed(exception) => fail(&promise, exception),
            Upstream::Canceled => cancel(&promise),
            Upstream::Completed => {
                let outcome = first_value(&upstream)
                    .and_then(|value| invoke(move || f(value).map_err(Into::into)));
                settle(&promise, outcome);
            }
        })
    }

    /// Runs `f` with the upstream future itself.
    ///
    /// Unlike [`Future::then`], `f` also runs when the upstream failed, and
    /// may move results out with [`Future::take_result`]. A canceled
    /// upstream without a failure still cancels the downstream.
    pub fn then_future<R, F>(&self, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(Self) -> R + Send + 'static,
    {
        self.then_future_with(ExecutionPolicy::Inline, f)
    }

    /// [`Future::then_future`] under an explicit execution policy.
    pub fn then_future_with<R, F>(&self, policy: ExecutionPolicy, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(Self) -> R + Send + 'static,
    {
        attach(self, policy, move |upstream, promise| {
            if matches!(Upstream::of(&upstream), Upstream::Canceled) {
                cancel(&promise);
            } else {
                settle(&promise, invoke(move || Ok(f(upstream))));
            }
        })
    }

    /// Handles a failure of type `E`; the handler's value becomes the
    /// downstream result.
    ///
    /// Failures of other types propagate unchanged. Results of a successful
    /// upstream are passed through, so handlers can be chained
    /// most-specific first with a catch-all ([`Future::on_failed_any`]) last.
    pub fn on_failed<E, F>(&self, handler: F) -> Self
    where
        T: Clone,
        E: StdError + 'static,
        F: FnOnce(&E) -> T + Send + 'static,
    {
        self.on_failed_with(ExecutionPolicy::Inline, handler)
    }

    /// [`Future::on_failed`] under an explicit execution policy.
    pub fn on_failed_with<E, F>(&self, policy: ExecutionPolicy, handler: F) -> Self
    where
        T: Clone,
        E: StdError + 'static,
        F: FnOnce(&E) -> T + Send + 'static,
    {
        self.try_on_failed_with(policy, move |error: &E| Ok::<T, Exception>(handler(error)))
    }

    /// Like [`Future::on_failed`] with a fallible handler; `Err` becomes the
    /// downstream exception.
    pub fn try_on_failed<E, X, F>(&self, handler: F) -> Self
    where
        T: Clone,
        E: StdError + 'static,
        X: Into<Exception>,
        F: FnOnce(&E) -> Result<T, X> + Send + 'static,
    {
        self.try_on_failed_with(ExecutionPolicy::Inline, handler)
    }

    /// [`Future::try_on_failed`] under an explicit execution policy.
    pub fn try_on_failed_with<E, X, F>(&self, policy: ExecutionPolicy, handler: F) -> Self
    where
        T: Clone,
        E: StdError + 'static,
        X: Into<Exception>,
        F: FnOnce(&E) -> Result<T, X> + Send + 'static,
    {
        self.recover(policy, move |exception| {
            exception
                .downcast_ref::<E>()
                .map(|error| invoke(|| handler(error).map_err(Into::into)))
        })
    }

    /// Handles any failure.
    pub fn on_failed_any<F>(&self, handler: F) -> Self
    where
        T: Clone,
        F: FnOnce(Exception) -> T + Send + 'static,
    {
        self.on_failed_any_with(ExecutionPolicy::Inline, handler)
    }

    /// [`Future::on_failed_any`] under an explicit execution policy.
    pub fn on_failed_any_with<F>(&self, policy: ExecutionPolicy, handler: F) -> Self
    where
        T: Clone,
        F: FnOnce(Exception) -> T + Send + 'static,
    {
        self.recover(policy, move |exception| {
            Some(invoke(move || Ok(handler(exception.clone()))))
        })
    }

    fn recover<F>(&self, policy: ExecutionPolicy, handler: F) -> Self
    where
        T: Clone,
        F: FnOnce(&Exception) -> Option<Result<T, Exception>> + Send + 'static,
    {
        attach(self, policy, move |upstream, promise| match Upstream::of(&upstream) {
            Upstream::Failed(exception) => match handler(&exception) {
                Some(outcome) => settle(&promise, outcome),
                None => fail(&promise, exception),
            },
            Upstream::Canceled => cancel(&promise),
            Upstream::Completed => pass_through(&upstream, &promise),
        })
    }

    /// Handles cancellation; the handler's value becomes the downstream
    /// result. Failures propagate, results of a successful upstream pass
    /// through.
    pub fn on_canceled<F>(&self, handler: F) -> Self
    where
        T: Clone,
        F: FnOnce() -> T + Send + 'static,
    {
        self.on_canceled_with(ExecutionPolicy::Inline, handler)
    }

    /// [`Future::on_canceled`] under an explicit execution policy.
    pub fn on_canceled_with<F>(&self, policy: ExecutionPolicy, handler: F) -> Self
    where
        T: Clone,
        F: FnOnce() -> T + Send + 'static,
    {
        self.on_canceled_future_with(policy, move |_| handler())
    }

    /// Like [`Future::on_canceled`], handing the canceled upstream to the
    /// handler so it can inspect partial results or progress.
    pub fn on_canceled_future<F>(&self, handler: F) -> Self
    where
        T: Clone,
        F: FnOnce(Self) -> T + Send + 'static,
    {
        self.on_canceled_future_with(ExecutionPolicy::Inline, handler)
    }

    /// [`Future::on_canceled_future`] under an explicit execution policy.
    pub fn on_canceled_future_with<F>(&self, policy: ExecutionPolicy, handler: F) -> Self
    where
        T: Clone,
        F: FnOnce(Self) -> T + Send + 'static,
    {
        attach(self, policy, move |upstream, promise| match Upstream::of(&upstream) {
            Upstream::Failed(exception) => fail(&promise, exception),
            Upstream::Canceled => settle(&promise, invoke(move || Ok(handler(upstream)))),
            Upstream::Completed => pass_through(&upstream, &promise),
        })
    }
}
