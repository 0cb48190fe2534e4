//! fulfil: thread-safe promises and futures with continuations.
//!
//! # Overview
//!
//! A [`Promise`] produces results, progress and a final status into a shared,
//! lock-protected state; any number of [`Future`] handles observe the same
//! state from other threads. Futures block for values, stream them as they
//! arrive, request cancellation or suspension, and chain continuations that
//! run once the state finishes.
//!
//! ```
//! use fulfil::Promise;
//! use std::thread;
//!
//! let promise = Promise::new();
//! let future = promise.future();
//! let doubled = future.then(|x: i32| x * 2);
//!
//! thread::spawn(move || {
//!     promise.start();
//!     promise.report_result(21);
//!     promise.finish();
//! });
//!
//! assert_eq!(doubled.result().unwrap(), 42);
//! ```
//!
//! # Core Guarantees
//!
//! - **Write-once results**: every index is stored at most once; results
//!   reported after finish or cancel are dropped
//! - **No callbacks under the lock**: continuations and watchers run after
//!   the state's mutex is released
//! - **Failures surface at consumption**: a stored producer error is raised
//!   by `wait_for_finished`, `result_at`, `results` and friends, keeping its
//!   concrete type for downcasting
//! - **Chains release their captures**: once a continuation resolves, only
//!   caller-held futures keep its downstream alive
//!
//! # Module Structure
//!
//! - [`store`]: sparse write-once result buffer with filter mode
//! - [`status`]: status flags and progress snapshot
//! - [`promise`]: producer handle
//! - [`future`]: consumer handle and streaming iterator
//! - [`continuation`]: `then`, `on_failed`, `on_canceled` chains
//! - [`executor`]: execution policies and the executor/context seams
//! - [`pool`]: thread pool executor
//! - [`event_loop`]: single-thread context
//! - [`watcher`]: transition notifications
//! - [`ready`]: pre-finished futures
//! - [`combinator`]: `when_all`, `when_any`
//! - [`run`]: run closures on an executor
//! - [`config`]: thread pool configuration
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::significant_drop_tightening)]

pub mod combinator;
pub mod config;
pub mod continuation;
pub mod error;
pub mod event_loop;
pub mod executor;
pub mod future;
pub mod pool;
pub mod promise;
pub mod ready;
pub mod run;
pub mod status;
pub mod store;
pub mod tracing_compat;
pub mod watcher;

mod state;

#[cfg(test)]
pub(crate) mod test_utils;

pub use combinator::{when_all, when_any, WhenAny};
pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{ConfigError, Exception, FutureError, PanicError, Result};
pub use event_loop::EventLoop;
pub use executor::{Context, ExecutionPolicy, Executor, Task};
pub use future::{Future, ResultStream};
pub use pool::ThreadPool;
pub use promise::Promise;
pub use ready::{
    make_canceled_future, make_exceptional_future, make_ready_future, make_ready_results,
    make_ready_void,
};
pub use run::{run, run_with_promise};
pub use status::{Progress, Status};
pub use store::{ResultCursor, ResultStore};
pub use watcher::Watcher;
