//! Logging facade for the engine.
//!
//! With the `tracing-integration` feature (on by default) this re-exports the
//! `tracing` macros the engine logs through. Without it, the same names
//! resolve to macros that expand to nothing, so call sites never need their
//! own `cfg` guards.
//!
//! | Level | Used for |
//! |-------|----------|
//! | `trace!` | state transitions, pool worker lifecycle |
//! | `debug!` | continuation resolution, pool and loop setup |
//! | `warn!` | dropped work: shut-down pool, stopped loop, failed spawn, task panic |
//!
//! ```rust,ignore
//! use fulfil::tracing_compat::{debug, trace};
//!
//! trace!(state = id, "finished");
//! debug!(upstream = up, downstream = down, "resolving continuation");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! Expands every logging call to an empty statement.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
