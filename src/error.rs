//! Error types for the future/promise engine.
//!
//! Error handling follows two rules:
//!
//! - Producer-side rejections (duplicate result index, reporting after
//!   finish or cancel) are plain `bool` returns. Producers branch on them in
//!   hot loops and never see an error value.
//! - Consumer-side operations that would hand out a value (`wait`,
//!   `result_at`, `results`, `take_result`) return [`FutureError`]. A stored
//!   producer failure comes back as [`FutureError::Exception`] carrying the
//!   *original* error object, so callers and `on_failed::<E>` continuations
//!   can downcast it to its concrete type.
//!
//! A consumer that never calls a consuming operation never observes an
//! error, even when the producer failed.

use core::fmt;
use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

/// A type-erased error stored by a producer and re-raised to consumers.
///
/// Cloning is cheap (shared pointer); every consumption point receives the
/// same underlying error object.
#[derive(Clone)]
pub struct Exception {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl Exception {
    /// Wraps a concrete error.
    #[must_use]
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Builds an exception from a caught panic payload.
    ///
    /// The payload is rendered to a message; the resulting exception
    /// downcasts to [`PanicError`].
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(PanicError::from_payload(payload.as_ref()))
    }

    /// Returns true if the stored error is of type `E`.
    #[must_use]
    pub fn is<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.inner.is::<E>()
    }

    /// Returns a reference to the stored error if it is of type `E`.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// Returns the stored error as a trait object.
    #[must_use]
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    /// Returns true if both handles point at the same stored error.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E> From<E> for Exception
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Exception").field(&self.inner).finish()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

/// A panic caught inside a continuation callback or an executor task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("panic: {message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    /// Creates a panic error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised by consumer-side operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FutureError {
    /// The producer reported an error.
    #[error("{0}")]
    Exception(Exception),
    /// The state finished with fewer results than the requested index.
    #[error("result index {index} out of range (result count {count})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Visible results at the time of the request.
        count: usize,
    },
    /// The state was canceled before the requested value was produced.
    #[error("future was canceled")]
    Canceled,
    /// The results were already moved out by `take_result`/`take_results`.
    #[error("results were already taken from this future")]
    ResultsTaken,
}

impl FutureError {
    /// Returns the stored producer error, if this is one.
    #[must_use]
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Exception(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if this error is a cancellation.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<Exception> for FutureError {
    fn from(exception: Exception) -> Self {
        Self::Exception(exception)
    }
}

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set to an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// What the variable should contain.
        expected: &'static str,
        /// The raw value found.
        value: String,
    },
    /// A configuration value is out of its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

/// Result alias for consumer operations.
pub type Result<T> = std::result::Result<T, FutureError>;
