//! Notification bridge for state transitions.
//!
//! A [`Watcher`] attached to a future receives one callback per observable
//! transition. Events are collected while the state's lock is held and
//! delivered only after it is released, so a watcher may freely call back
//! into the future it observes.

use smallvec::SmallVec;
use std::ops::Range;
use std::sync::Arc;

/// Receives state transitions of a future.
///
/// Every method has an empty default so implementors only override what
/// they need. Callbacks run on a thread that caused a transition, never
/// concurrently for the same future, and always in the order the
/// transitions happened.
pub trait Watcher: Send + Sync {
    /// The producer called `start()`.
    fn on_started(&self) {}

    /// Results in the half-open visible range `begin..end` became available.
    fn on_result_ready_at(&self, begin: usize, end: usize) {
        let _ = (begin, end);
    }

    /// The progress range changed.
    fn on_progress_range(&self, minimum: i32, maximum: i32) {
        let _ = (minimum, maximum);
    }

    /// The progress value or text changed.
    fn on_progress(&self, value: i32, text: Option<&str>) {
        let _ = (value, text);
    }

    /// A consumer asked the producer to pause.
    fn on_suspending(&self) {}

    /// The producer acknowledged the pause.
    fn on_suspended(&self) {}

    /// The state left the suspending/suspended phase.
    fn on_resumed(&self) {}

    /// Cancellation was requested.
    fn on_canceled(&self) {}

    /// The state finished.
    fn on_finished(&self) {}
}

/// A single transition queued for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchEvent {
    Started,
    ResultsReady(Range<usize>),
    ProgressRange(i32, i32),
    Progress(i32, Option<String>),
    Suspending,
    Suspended,
    Resumed,
    Canceled,
    Finished,
}

impl WatchEvent {
    fn deliver(&self, watcher: &dyn Watcher) {
        match self {
            Self::Started => watcher.on_started(),
            Self::ResultsReady(range) => watcher.on_result_ready_at(range.start, range.end),
            Self::ProgressRange(min, max) => watcher.on_progress_range(*min, *max),
            Self::Progress(value, text) => watcher.on_progress(*value, text.as_deref()),
            Self::Suspending => watcher.on_suspending(),
            Self::Suspended => watcher.on_suspended(),
            Self::Resumed => watcher.on_resumed(),
            Self::Canceled => watcher.on_canceled(),
            Self::Finished => watcher.on_finished(),
        }
    }
}

/// Events gathered under the lock, plus the watchers to deliver them to.
///
/// Built inside a locked section, dispatched after the guard is dropped.
#[derive(Default)]
pub(crate) struct PendingEvents {
    events: SmallVec<[WatchEvent; 4]>,
    watchers: Vec<Arc<dyn Watcher>>,
}

impl PendingEvents {
    pub(crate) fn new(watchers: &[Arc<dyn Watcher>]) -> Self {
        Self {
            events: SmallVec::new(),
            watchers: watchers.to_vec(),
        }
    }

    /// Queues an event. Adjacent result ranges are merged into one batch.
    pub(crate) fn push(&mut self, event: WatchEvent) {
        if self.watchers.is_empty() {
            return;
        }
        if let WatchEvent::ResultsReady(next) = &event {
            if next.is_empty() {
                return;
            }
            if let Some(WatchEvent::ResultsReady(last)) = self.events.last_mut() {
                if last.end == next.start {
                    last.end = next.end;
                    return;
                }
            }
        }
        self.events.push(event);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Delivers every queued event, in order, to every watcher.
    pub(crate) fn dispatch(self) {
        for event in &self.events {
            for watcher in &self.watchers {
                event.deliver(watcher.as_ref());
            }
        }
    }
}
