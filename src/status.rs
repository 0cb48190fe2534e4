//! Status flags and progress snapshot of a shared state.

use core::fmt;

/// Bitset of lifecycle flags.
///
/// `STARTED` is set once and never cleared. `FINISHED` is terminal.
/// `CANCELED` may be set any time before `FINISHED` and persists.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status(u8);

impl Status {
    /// No flags: the state exists but its producer has not started.
    pub const PENDING: Self = Self(0);
    /// The producer called `start()`.
    pub const STARTED: Self = Self(1 << 0);
    /// Started and not yet finished.
    pub const RUNNING: Self = Self(1 << 1);
    /// Terminal.
    pub const FINISHED: Self = Self(1 << 2);
    /// Cancellation was requested.
    pub const CANCELED: Self = Self(1 << 3);
    /// A consumer asked the producer to pause.
    pub const SUSPENDING: Self = Self(1 << 4);
    /// The producer acknowledged the pause.
    pub const SUSPENDED: Self = Self(1 << 5);
    /// Cooperative hint to slow down reporting.
    pub const THROTTLED: Self = Self(1 << 6);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::STARTED, "Started"),
        (Self::RUNNING, "Running"),
        (Self::FINISHED, "Finished"),
        (Self::CANCELED, "Canceled"),
        (Self::SUSPENDING, "Suspending"),
        (Self::SUSPENDED, "Suspended"),
        (Self::THROTTLED, "Throttled"),
    ];

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any flag in `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Sets the given flags.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the given flags.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns true if no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for Status {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("Status(Pending)");
        }
        let mut set = f.debug_set();
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Snapshot of a state's progress.
///
/// `value` never decreases through `report_progress`. When a non-empty
/// range is set (`minimum < maximum`), reported values are clamped into it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    /// Lower bound of the range.
    pub minimum: i32,
    /// Upper bound of the range.
    pub maximum: i32,
    /// Current value.
    pub value: i32,
    /// Optional text reported alongside the value.
    pub text: Option<String>,
}

impl Progress {
    /// Returns true if a non-empty range was set.
    #[must_use]
    pub const fn has_range(&self) -> bool {
        self.minimum < self.maximum
    }

    /// Applies a new range, clamping the current value into it.
    ///
    /// A `maximum` below `minimum` collapses the range to `minimum`.
    pub(crate) fn set_range(&mut self, minimum: i32, maximum: i32) -> bool {
        let maximum = maximum.max(minimum);
        if self.minimum == minimum && self.maximum == maximum {
            return false;
        }
        self.minimum = minimum;
        self.maximum = maximum;
        self.value = self.value.clamp(minimum, maximum);
        true
    }

    /// Applies a progress report.
    ///
    /// Returns false when the update would move the value backwards or
    /// changes nothing.
    pub(crate) fn update(&mut self, value: i32, text: Option<&str>) -> bool {
        let value = if self.has_range() {
            value.clamp(self.minimum, self.maximum)
        } else {
            value
        };
        if value < self.value {
            return false;
        }
        let text_changed = text.is_some_and(|t| self.text.as_deref() != Some(t));
        if value == self.value && !text_changed {
            return false;
        }
        self.value = value;
        if let Some(text) = text {
            self.text = Some(text.to_string());
        }
        true
    }
}
