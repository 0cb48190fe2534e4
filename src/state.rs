//! The shared state behind every promise/future pair.
//!
//! One [`Shared`] record is owned jointly (through `Arc`) by the promise that
//! produces into it, every future that observes it, and, transiently, by the
//! continuation links that resolve off it. It holds:
//!
//! ```text
//! ┌──────────────────────── Shared<T> ───────────────────────┐
//! │ id, policy (immutable)                                   │
//! │ Mutex<StateData<T>>                       Condvar        │
//! │   status     Started|Running|Finished|Canceled|...       │
//! │   progress   {min, max, value, text}                     │
//! │   exception  first reported error                        │
//! │   store      ResultStore<T>                              │
//! │   continuations   pending links, taken on finish         │
//! │   downstream      weak refs for chain cancellation       │
//! │   watchers        notification sinks                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation takes the mutex. No user code (continuation callbacks,
//! watchers) ever runs while it is held: transitions gather their watcher
//! events and continuation links under the lock and run them after release.
//! Watcher batches go through a per-state outbox drained by one thread at a
//! time, which keeps delivery in transition order across threads.
//!
//! Blocking waits (`wait_until_finished`, `wait_for_result`,
//! `wait_for_next`, `suspend_if_requested`) share one condition variable,
//! signaled on every result, cancellation, resume and finish.

use crate::error::{Exception, FutureError};
use crate::executor::ExecutionPolicy;
use crate::status::{Progress, Status};
use crate::store::ResultStore;
use crate::tracing_compat::trace;
use crate::watcher::{PendingEvents, WatchEvent, Watcher};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// A registered continuation: resolves a downstream state off this one.
pub(crate) type Continuation<T> = Box<dyn FnOnce(Arc<Shared<T>>) + Send + 'static>;

/// Type-erased view of a state used to walk a continuation chain.
pub(crate) trait ChainLink: Send + Sync {
    /// Cancels this state if it is unfinished, otherwise forwards the
    /// cancellation to its downstream states.
    fn cancel_chain(&self);
}

struct StateData<T> {
    status: Status,
    progress: Progress,
    exception: Option<Exception>,
    store: ResultStore<T>,
    results_taken: bool,
    continuations: Vec<Continuation<T>>,
    downstream: Vec<Weak<dyn ChainLink>>,
    watchers: Vec<Arc<dyn Watcher>>,
    /// Event batches waiting for delivery, in transition order.
    outbox: VecDeque<PendingEvents>,
    /// A thread is draining `outbox`.
    delivering: bool,
}

impl<T> StateData<T> {
    fn is_terminal(&self) -> bool {
        self.status.intersects(Status::FINISHED | Status::CANCELED)
    }

    fn events(&self) -> PendingEvents {
        PendingEvents::new(&self.watchers)
    }

    /// Fails with the stored exception, or with `ResultsTaken`.
    fn check_consumable(&self) -> Result<(), FutureError> {
        if let Some(exception) = &self.exception {
            return Err(FutureError::Exception(exception.clone()));
        }
        if self.results_taken {
            return Err(FutureError::ResultsTaken);
        }
        Ok(())
    }

    fn missing(&self, index: usize) -> FutureError {
        if self.status.contains(Status::CANCELED) {
            FutureError::Canceled
        } else {
            FutureError::IndexOutOfRange {
                index,
                count: self.store.count(),
            }
        }
    }
}

/// The reference-counted, lock-protected state machine.
pub(crate) struct Shared<T> {
    id: u64,
    policy: ExecutionPolicy,
    data: Mutex<StateData<T>>,
    changed: Condvar,
}

impl<T> Shared<T> {
    /// Creates a state in the not-yet-started condition.
    pub(crate) fn new(policy: ExecutionPolicy) -> Arc<Self> {
        let id = NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed);
        trace!(state = id, policy = policy.name(), "state created");
        Arc::new(Self {
            id,
            policy,
            data: Mutex::new(StateData {
                status: Status::PENDING,
                progress: Progress::default(),
                exception: None,
                store: ResultStore::new(),
                results_taken: false,
                continuations: Vec::new(),
                downstream: Vec::new(),
                watchers: Vec::new(),
                outbox: VecDeque::new(),
                delivering: false,
            }),
            changed: Condvar::new(),
        })
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    /// The policy continuations registered with `Inherit` fall back to.
    pub(crate) const fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, StateData<T>> {
        self.data.lock()
    }

    // --------------------------------------------------------------
    // Snapshot reads
    // --------------------------------------------------------------

    pub(crate) fn status(&self) -> Status {
        self.lock().status
    }

    pub(crate) fn progress(&self) -> Progress {
        self.lock().progress.clone()
    }

    pub(crate) fn exception(&self) -> Option<Exception> {
        self.lock().exception.clone()
    }

    pub(crate) fn result_count(&self) -> usize {
        self.lock().store.count()
    }

    pub(crate) fn is_result_ready_at(&self, index: usize) -> bool {
        self.lock().store.contains(index)
    }

    pub(crate) fn results_taken(&self) -> bool {
        self.lock().results_taken
    }

    // --------------------------------------------------------------
    // Producer-side transitions
    // --------------------------------------------------------------

    /// Sets `Started | Running`. A second call changes nothing.
    pub(crate) fn start(&self) -> bool {
        let mut data = self.lock();
        if data.status.contains(Status::STARTED) {
            return false;
        }
        data.status.insert(Status::STARTED | Status::RUNNING);
        let mut events = data.events();
        events.push(WatchEvent::Started);
        trace!(state = self.id, "started");
        self.publish(data, events);
        true
    }

    pub(crate) fn set_filter_mode(&self, enable: bool) {
        self.lock().store.set_filter_mode(enable);
    }

    /// Stores one result. Dropped (false) after finish or cancel.
    pub(crate) fn report_result(&self, index: Option<usize>, value: T) -> bool {
        self.mutate_store(|store| store.insert_one(index, value))
    }

    /// Stores a contiguous batch. Dropped (false) after finish or cancel.
    pub(crate) fn report_results(&self, index: Option<usize>, values: Vec<T>) -> bool {
        self.mutate_store(|store| store.insert_batch(index, values))
    }

    /// Marks filter-mode slots as permanently absent.
    pub(crate) fn report_canceled_results(&self, index: usize, count: usize) -> bool {
        self.mutate_store(|store| store.insert_canceled(index, count))
    }

    fn mutate_store<F>(&self, op: F) -> bool
    where
        F: FnOnce(&mut ResultStore<T>) -> Option<std::ops::Range<usize>>,
    {
        let mut data = self.lock();
        if data.is_terminal() {
            return false;
        }
        let Some(ready) = op(&mut data.store) else {
            return false;
        };
        let mut events = data.events();
        if !ready.is_empty() {
            trace!(state = self.id, begin = ready.start, end = ready.end, "results ready");
            events.push(WatchEvent::ResultsReady(ready));
            self.changed.notify_all();
        }
        self.publish(data, events);
        true
    }

    pub(crate) fn set_progress_range(&self, minimum: i32, maximum: i32) {
        let mut data = self.lock();
        if data.status.contains(Status::FINISHED) {
            return;
        }
        let old_value = data.progress.value;
        if !data.progress.set_range(minimum, maximum) {
            return;
        }
        let mut events = data.events();
        events.push(WatchEvent::ProgressRange(
            data.progress.minimum,
            data.progress.maximum,
        ));
        if data.progress.value != old_value {
            events.push(WatchEvent::Progress(
                data.progress.value,
                data.progress.text.clone(),
            ));
        }
        self.publish(data, events);
    }

    /// Updates progress. Ignored after finish and for backwards moves.
    pub(crate) fn report_progress(&self, value: i32, text: Option<&str>) -> bool {
        let mut data = self.lock();
        if data.status.contains(Status::FINISHED) || !data.progress.update(value, text) {
            return false;
        }
        let mut events = data.events();
        events.push(WatchEvent::Progress(
            data.progress.value,
            data.progress.text.clone(),
        ));
        self.publish(data, events);
        true
    }

    /// Stores the first exception. Later ones, and any reported after
    /// finish or cancel, are dropped.
    pub(crate) fn report_exception(&self, exception: Exception) -> bool {
        let mut data = self.lock();
        if data.exception.is_some() || data.is_terminal() {
            return false;
        }
        trace!(state = self.id, error = %exception, "exception stored");
        data.exception = Some(exception);
        true
    }

    /// Sets `Canceled` unless already finished. Idempotent.
    pub(crate) fn request_cancel(&self) -> bool {
        let mut data = self.lock();
        if data.is_terminal() {
            return false;
        }
        data.status.insert(Status::CANCELED);
        let mut events = data.events();
        events.push(WatchEvent::Canceled);
        trace!(state = self.id, "cancel requested");
        self.changed.notify_all();
        self.publish(data, events);
        true
    }

    pub(crate) fn request_suspend(&self) -> bool {
        let mut data = self.lock();
        if data.is_terminal()
            || data
                .status
                .intersects(Status::SUSPENDING | Status::SUSPENDED)
        {
            return false;
        }
        data.status.insert(Status::SUSPENDING);
        let mut events = data.events();
        events.push(WatchEvent::Suspending);
        trace!(state = self.id, "suspend requested");
        self.publish(data, events);
        true
    }

    /// Producer side: flips `Suspending` to `Suspended`.
    pub(crate) fn acknowledge_suspended(&self) -> bool {
        let mut data = self.lock();
        if !data.status.contains(Status::SUSPENDING) {
            return false;
        }
        data.status.remove(Status::SUSPENDING);
        data.status.insert(Status::SUSPENDED);
        let mut events = data.events();
        events.push(WatchEvent::Suspended);
        trace!(state = self.id, "suspended");
        self.publish(data, events);
        true
    }

    /// Producer side: acknowledges a pending suspend, then blocks until
    /// resumed, canceled or finished.
    pub(crate) fn suspend_if_requested(&self) {
        if !self.acknowledge_suspended() {
            return;
        }
        let mut data = self.lock();
        while data.status.contains(Status::SUSPENDED) && !data.is_terminal() {
            self.changed.wait(&mut data);
        }
    }

    /// Clears `Suspending` and `Suspended`, whichever phase is active.
    pub(crate) fn resume(&self) -> bool {
        let mut data = self.lock();
        if !data
            .status
            .intersects(Status::SUSPENDING | Status::SUSPENDED)
        {
            return false;
        }
        data.status.remove(Status::SUSPENDING | Status::SUSPENDED);
        let mut events = data.events();
        events.push(WatchEvent::Resumed);
        trace!(state = self.id, "resumed");
        self.changed.notify_all();
        self.publish(data, events);
        true
    }

    pub(crate) fn set_throttled(&self, enable: bool) {
        let mut data = self.lock();
        if enable {
            data.status.insert(Status::THROTTLED);
        } else {
            data.status.remove(Status::THROTTLED);
        }
    }

    /// Sets `Finished`, wakes every waiter and resolves continuations.
    ///
    /// Continuations run after the lock is released, in registration order.
    pub(crate) fn finish(self: &Arc<Self>) -> bool {
        let mut data = self.lock();
        if data.status.contains(Status::FINISHED) {
            return false;
        }
        data.status.insert(Status::FINISHED);
        data.status
            .remove(Status::RUNNING | Status::SUSPENDING | Status::SUSPENDED);
        let continuations = std::mem::take(&mut data.continuations);
        let mut events = data.events();
        events.push(WatchEvent::Finished);
        trace!(
            state = self.id,
            continuations = continuations.len(),
            "finished"
        );
        self.changed.notify_all();
        self.publish(data, events);
        for continuation in continuations {
            continuation(Arc::clone(self));
        }
        true
    }

    // --------------------------------------------------------------
    // Consumer-side waits
    // --------------------------------------------------------------

    fn wait_terminal(&self) -> MutexGuard<'_, StateData<T>> {
        let mut data = self.lock();
        while !data.is_terminal() {
            self.changed.wait(&mut data);
        }
        data
    }

    /// Blocks until finished or canceled; re-raises a stored exception.
    pub(crate) fn wait_until_finished(&self) -> Result<(), FutureError> {
        let data = self.wait_terminal();
        match &data.exception {
            Some(exception) => Err(FutureError::Exception(exception.clone())),
            None => Ok(()),
        }
    }

    /// Blocks until `index` is visible or the state is terminal.
    ///
    /// Returns `index` if it became visible, otherwise the lowest visible
    /// index above it that a terminal state still holds.
    pub(crate) fn wait_for_next(&self, index: usize) -> Option<usize> {
        let mut data = self.lock();
        while !data.store.contains(index) && !data.is_terminal() && !data.results_taken {
            self.changed.wait(&mut data);
        }
        let next = data
            .store
            .iter()
            .map(|(visible, _)| visible)
            .find(|visible| *visible >= index);
        next
    }

    /// Registers a watcher and replays the current state to it.
    pub(crate) fn watch(&self, watcher: Arc<dyn Watcher>) {
        let mut data = self.lock();
        data.watchers.push(Arc::clone(&watcher));
        let mut replay = PendingEvents::new(std::slice::from_ref(&watcher));
        let status = data.status;
        if status.contains(Status::STARTED) {
            replay.push(WatchEvent::Started);
        }
        if data.progress.has_range() {
            replay.push(WatchEvent::ProgressRange(
                data.progress.minimum,
                data.progress.maximum,
            ));
        }
        if data.progress != Progress::default() {
            replay.push(WatchEvent::Progress(
                data.progress.value,
                data.progress.text.clone(),
            ));
        }
        let ready: Vec<_> = data.store.iter().map(|(index, _)| index).collect();
        for index in ready {
            replay.push(WatchEvent::ResultsReady(index..index + 1));
        }
        if status.contains(Status::SUSPENDING) {
            replay.push(WatchEvent::Suspending);
        }
        if status.contains(Status::SUSPENDED) {
            replay.push(WatchEvent::Suspended);
        }
        if status.contains(Status::CANCELED) {
            replay.push(WatchEvent::Canceled);
        }
        if status.contains(Status::FINISHED) {
            replay.push(WatchEvent::Finished);
        }
        self.publish(data, replay);
    }

    /// Queues `events` and releases the lock, then delivers queued batches
    /// until the queue is empty.
    ///
    /// Only one thread delivers at a time. A transition made while another
    /// thread is inside a watcher callback is queued behind it and delivered
    /// by that thread, so every watcher sees transitions in the order they
    /// were applied.
    fn publish(&self, mut data: MutexGuard<'_, StateData<T>>, events: PendingEvents) {
        if !events.is_empty() {
            data.outbox.push_back(events);
        }
        if data.delivering {
            return;
        }
        let mut next = data.outbox.pop_front();
        if next.is_none() {
            return;
        }
        data.delivering = true;
        drop(data);

        let reset = DeliveryReset(&self.data);
        while let Some(batch) = next {
            batch.dispatch();
            let mut data = self.lock();
            next = data.outbox.pop_front();
            if next.is_none() {
                data.delivering = false;
            }
        }
        std::mem::forget(reset);
    }

    // --------------------------------------------------------------
    // Continuation plumbing
    // --------------------------------------------------------------

    /// Queues `continuation` for when this state finishes.
    ///
    /// Returns it back if the state already finished; the caller resolves
    /// it immediately.
    pub(crate) fn add_continuation(
        &self,
        continuation: Continuation<T>,
    ) -> Option<Continuation<T>> {
        let mut data = self.lock();
        if data.status.contains(Status::FINISHED) {
            return Some(continuation);
        }
        data.continuations.push(continuation);
        None
    }

    /// Remembers a downstream state for chain cancellation.
    pub(crate) fn add_downstream(&self, link: Weak<dyn ChainLink>) {
        let mut data = self.lock();
        data.downstream.retain(|existing| existing.strong_count() > 0);
        data.downstream.push(link);
    }

    fn downstream_links(&self) -> Vec<Arc<dyn ChainLink>> {
        self.lock()
            .downstream
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

impl<T: Clone> Shared<T> {
    /// Blocks until `index` is visible or the state is terminal, then
    /// returns a copy of the value.
    pub(crate) fn wait_for_result(&self, index: usize) -> Result<T, FutureError> {
        let mut data = self.lock();
        while !data.store.contains(index) && !data.is_terminal() && !data.results_taken {
            self.changed.wait(&mut data);
        }
        data.check_consumable()?;
        match data.store.get(index) {
            Some(value) => Ok(value.clone()),
            None => Err(data.missing(index)),
        }
    }

    /// Blocks until terminal, then returns a copy of every visible result.
    pub(crate) fn results(&self) -> Result<Vec<T>, FutureError> {
        let data = self.wait_terminal();
        data.check_consumable()?;
        Ok(data.store.iter().map(|(_, value)| value.clone()).collect())
    }

    /// Copy of the result at index 0 without waiting.
    pub(crate) fn first_result(&self) -> Option<T> {
        self.lock().store.get(0).cloned()
    }

    /// Copy of every visible result without waiting.
    pub(crate) fn visible_results(&self) -> Vec<T> {
        self.lock()
            .store
            .iter()
            .map(|(_, value)| value.clone())
            .collect()
    }
}

impl<T> Shared<T> {
    /// Blocks until terminal, then moves every visible result out.
    pub(crate) fn take_results(&self) -> Result<Vec<T>, FutureError> {
        let mut data = self.wait_terminal();
        data.check_consumable()?;
        data.results_taken = true;
        let taken = data.store.take_all();
        drop(data);
        self.changed.notify_all();
        Ok(taken)
    }

    /// Blocks until terminal, then moves the first result out. The other
    /// results are discarded.
    pub(crate) fn take_result(&self) -> Result<T, FutureError> {
        let mut data = self.wait_terminal();
        data.check_consumable()?;
        let missing = data.missing(0);
        data.results_taken = true;
        let first = data.store.take_all().into_iter().next();
        drop(data);
        self.changed.notify_all();
        first.ok_or(missing)
    }
}

impl<T: Send + 'static> ChainLink for Shared<T> {
    fn cancel_chain(&self) {
        if self.status().contains(Status::FINISHED) {
            for link in self.downstream_links() {
                link.cancel_chain();
            }
        } else {
            self.request_cancel();
        }
    }
}

/// Hands delivery back if a watcher panics mid-batch.
struct DeliveryReset<'a, T>(&'a Mutex<StateData<T>>);

impl<T> Drop for DeliveryReset<'_, T> {
    fn drop(&mut self) {
        self.0.lock().delivering = false;
    }
}

/// Returns true if `T` is the payload-free unit type.
pub(crate) fn is_void<T: 'static>() -> bool {
    TypeId::of::<T>() == TypeId::of::<()>()
}

/// Produces the unit value when `T` is `()`, for result-less void futures.
pub(crate) fn void_value<T: 'static>() -> Option<T> {
    let unit: Box<dyn Any> = Box::new(());
    unit.downcast::<T>().ok().map(|boxed| *boxed)
}
