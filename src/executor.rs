//! Execution capabilities consumed by continuations.
//!
//! The engine does not own threads. Where a continuation runs is decided by
//! its [`ExecutionPolicy`], which names one of:
//!
//! - the resolving thread itself ([`ExecutionPolicy::Inline`]),
//! - a fresh single-use thread ([`ExecutionPolicy::Async`]),
//! - an [`Executor`] such as [`ThreadPool`](crate::pool::ThreadPool),
//! - a [`Context`] bound to one owning thread, such as
//!   [`EventLoop`](crate::event_loop::EventLoop).
//!
//! Executors and contexts that can no longer run work drop the task. A
//! dropped continuation task drops the downstream promise it owns, which
//! cancels and finishes the downstream future, so waiters never hang.

use crate::tracing_compat::{trace, warn};
use core::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// A unit of work handed to an executor or context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted tasks to completion independently of the submitter.
pub trait Executor: Send + Sync {
    /// Submits a task. Executors that are shut down drop it.
    fn submit(&self, task: Task);

    /// Returns true if no task is queued or running.
    fn is_idle(&self) -> bool;
}

/// An execution context bound to a single owning thread.
pub trait Context: Send + Sync {
    /// The thread that runs posted closures.
    fn owning_thread(&self) -> ThreadId;

    /// Queues a closure to run on the owning thread. Always asynchronous
    /// relative to the caller; stopped contexts drop it.
    fn post(&self, task: Task);
}

/// Where a continuation callback runs.
#[derive(Clone, Default)]
pub enum ExecutionPolicy {
    /// On the thread that resolves the upstream.
    #[default]
    Inline,
    /// On a dedicated, single-use thread.
    Async,
    /// On the referenced executor.
    ThreadPool(Arc<dyn Executor>),
    /// On the thread owning the referenced context.
    Context(Arc<dyn Context>),
    /// Whatever the upstream link used.
    Inherit,
}

impl ExecutionPolicy {
    /// Builds a thread-pool policy.
    #[must_use]
    pub fn pool(executor: Arc<dyn Executor>) -> Self {
        Self::ThreadPool(executor)
    }

    /// Builds a context-affine policy.
    #[must_use]
    pub fn context(context: Arc<dyn Context>) -> Self {
        Self::Context(context)
    }

    /// Replaces `Inherit` with `upstream`. `upstream` is never `Inherit`.
    #[must_use]
    pub(crate) fn resolve(self, upstream: &Self) -> Self {
        match self {
            Self::Inherit => upstream.clone(),
            other => other,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Async => "async",
            Self::ThreadPool(_) => "thread-pool",
            Self::Context(_) => "context",
            Self::Inherit => "inherit",
        }
    }

    /// Runs `task` according to this policy.
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    pub(crate) fn dispatch(&self, task: Task) {
        trace!(policy = self.name(), "dispatching continuation");
        match self {
            Self::Inline | Self::Inherit => task(),
            Self::Async => {
                let spawned = thread::Builder::new()
                    .name("fulfil-continuation".to_string())
                    .spawn(task);
                if let Err(err) = spawned {
                    warn!(error = %err, "failed to spawn continuation thread; task dropped");
                }
            }
            Self::ThreadPool(executor) => executor.submit(task),
            Self::Context(context) => context.post(task),
        }
    }
}

impl fmt::Debug for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context(context) => f
                .debug_tuple("Context")
                .field(&context.owning_thread())
                .finish(),
            other => f.write_str(match other {
                Self::Inline => "Inline",
                Self::Async => "Async",
                Self::ThreadPool(_) => "ThreadPool(..)",
                _ => "Inherit",
            }),
        }
    }
}
