//! Continuation chains: propagation, cancellation, policies and lifetimes.

#[macro_use]
mod common;

use common::*;
use fulfil::{
    make_exceptional_future, make_ready_future, run, run_with_promise, when_all, Context,
    EventLoop, ExecutionPolicy, Exception, FutureError, Promise, ThreadPool,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("timed out after {0:?}")]
struct TimedOut(Duration);

#[derive(Debug, thiserror::Error)]
#[error("refused")]
struct Refused;

/// Blocks an event loop until the returned sender fires or is dropped.
fn block_loop(event_loop: &EventLoop) -> mpsc::Sender<()> {
    let (release, gate) = mpsc::channel::<()>();
    event_loop.post(Box::new(move || {
        let _ = gate.recv();
    }));
    release
}

#[test]
fn two_step_chain_across_threads() {
    init_test_logging();
    test_phase!("two_step_chain");
    let (promise, future) = started::<i32>();
    let chained = future.then(|x| x + 1).then(|y| y * 2);

    let producer = thread::spawn(move || {
        promise.report_result(5);
        promise.finish();
    });
    assert_eq!(chained.result().expect("chain resolved"), 12);
    producer.join().expect("producer panicked");
    test_complete!("two_step_chain", value = 12);
}

#[test]
fn failure_short_circuits_to_matching_handler() {
    init_test_logging();
    let (promise, future) = started::<u32>();
    let then_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&then_ran);

    let recovered = future
        .then(move |x| {
            flag.store(true, Ordering::SeqCst);
            x * 2
        })
        .then(|x| x + 1)
        .on_failed(|_: &Refused| 0)
        .on_failed(|e: &TimedOut| u32::try_from(e.0.as_millis()).unwrap_or(u32::MAX));

    promise.report_exception(TimedOut(Duration::from_millis(250)));
    promise.finish();

    assert_eq!(recovered.result().expect("handled"), 250);
    assert!(!then_ran.load(Ordering::SeqCst));
}

#[test]
fn successful_results_pass_through_failure_handlers() {
    init_test_logging();
    let handled = make_ready_future(4)
        .on_failed(|_: &Refused| -1)
        .on_failed_any(|_| -2)
        .on_canceled(|| -3)
        .then(|x| x * 10);
    assert_eq!(handled.result().expect("value"), 40);
}

#[test]
fn canceling_one_chain_leaves_its_sibling_alone() {
    init_test_logging();
    test_phase!("mid_chain_cancel_isolation");
    let (promise, upstream) = started::<i32>();

    let left_mid = upstream.then(|x| x + 1);
    let left_end = left_mid.then(|x| x * 100);
    let right_end = upstream.then(|x| x - 1).then(|x| x * 2);

    left_mid.cancel();
    assert!(left_mid.is_canceled());
    assert!(!upstream.is_canceled());
    assert!(!right_end.is_canceled());

    promise.report_result(10);
    promise.finish();

    assert_eq!(right_end.result().expect("sibling chain"), 18);
    assert_eq!(upstream.result().expect("upstream"), 10);
    assert!(left_end.wait_for_finished().is_ok());
    assert!(left_end.is_canceled());
    assert!(matches!(left_end.result(), Err(FutureError::Canceled)));
    test_complete!("mid_chain_cancel_isolation");
}

#[test]
fn cancel_on_finished_future_travels_down_the_chain() {
    init_test_logging();
    let event_loop = EventLoop::new().expect("event loop");
    let release = block_loop(&event_loop);
    let context: Arc<dyn Context> = Arc::new(event_loop);

    let upstream = make_ready_future(1);
    let downstream = upstream.then_with(ExecutionPolicy::context(Arc::clone(&context)), |x| x + 1);
    assert!(!downstream.is_finished());

    upstream.cancel();
    assert!(!upstream.is_canceled());
    assert!(downstream.is_canceled());

    let _ = release.send(());
    assert!(downstream.wait_for_finished().is_ok());
    assert!(matches!(downstream.result(), Err(FutureError::Canceled)));
}

#[test]
fn cancel_before_any_result_cancels_the_whole_chain() {
    init_test_logging();
    let (promise, upstream) = started::<i32>();
    let end = upstream.then(|x| x + 1).then(|x| x * 2);

    upstream.cancel();
    assert!(promise.is_canceled());
    drop(promise);

    assert!(end.is_finished());
    assert!(end.is_canceled());
}

#[test]
fn on_canceled_recovers_and_failure_skips_it() {
    init_test_logging();
    let (promise, upstream) = started::<&str>();
    let recovered = upstream.then(str::len).on_canceled(|| 0);
    upstream.cancel();
    drop(promise);
    assert_eq!(recovered.result().expect("recovered"), 0);

    let failed = make_exceptional_future::<usize>(Refused).on_canceled(|| 0);
    assert!(failed
        .result()
        .expect_err("failure propagates")
        .exception()
        .is_some_and(Exception::is::<Refused>));
}

#[test]
fn continuations_run_in_registration_order() {
    init_test_logging();
    let (promise, upstream) = started::<u8>();
    let order = Arc::new(Mutex::new(Vec::new()));
    let chains: Vec<_> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            upstream.then(move |_| order.lock().push(i))
        })
        .collect();
    promise.report_result(0);
    promise.finish();
    for chain in &chains {
        assert!(chain.wait_for_finished().is_ok());
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn captured_state_is_released_after_resolution() {
    init_test_logging();
    let captured = Arc::new(String::from("payload"));
    let (promise, upstream) = started::<usize>();

    let held = Arc::clone(&captured);
    let downstream = upstream.then(move |n| held.len() + n);
    assert_eq!(Arc::strong_count(&captured), 2);

    promise.report_result(1);
    promise.finish();
    assert_eq!(downstream.result().expect("value"), 8);
    assert_eq!(Arc::strong_count(&captured), 1);
}

#[test]
fn skipped_callback_is_dropped_without_running() {
    init_test_logging();
    let captured = Arc::new(());
    let (promise, upstream) = started::<i32>();
    let held = Arc::clone(&captured);
    let downstream = upstream.then(move |x| {
        let _ = &held;
        x
    });
    assert_eq!(Arc::strong_count(&captured), 2);

    drop(promise);
    assert!(downstream.is_canceled());
    assert_eq!(Arc::strong_count(&captured), 1);
}

#[test]
fn self_capturing_chain_does_not_leak() {
    init_test_logging();
    let marker = Arc::new(());
    let (promise, upstream) = started::<Arc<()>>();
    promise.report_result(Arc::clone(&marker));

    let again = upstream.clone();
    let downstream = upstream.then(move |_| again.result_count());
    promise.finish();
    assert_eq!(downstream.result().expect("count"), 1);

    drop(promise);
    drop(upstream);
    drop(downstream);
    assert_eq!(Arc::strong_count(&marker), 1);
}

#[test]
fn pool_policy_runs_off_the_resolving_thread() {
    init_test_logging();
    let pool = Arc::new(ThreadPool::new(1, 2));
    let caller = thread::current().id();
    let (promise, upstream) = started::<i32>();

    let downstream = upstream.then_with(ExecutionPolicy::pool(pool.clone()), move |x| {
        (x * 3, thread::current().id() != caller)
    });
    promise.report_result(7);
    promise.finish();

    let (value, off_thread) = downstream.result().expect("pool continuation");
    assert_eq!(value, 21);
    assert!(off_thread);
    assert!(pool.shutdown_and_wait(Duration::from_secs(5)));
}

#[test]
fn context_policy_runs_on_the_owning_thread() {
    init_test_logging();
    let event_loop = Arc::new(EventLoop::with_name("chain-context").expect("event loop"));
    let owner = event_loop.owning_thread();
    let context: Arc<dyn Context> = event_loop.clone();

    let producer_side = thread::spawn(|| make_ready_future(2));
    let upstream = producer_side.join().expect("producer panicked");
    let downstream = upstream.then_with(ExecutionPolicy::context(context), |x| {
        (x, thread::current().id(), thread::current().name().map(str::to_owned))
    });

    let (value, ran_on, name) = downstream.result().expect("context continuation");
    assert_eq!(value, 2);
    assert_eq!(ran_on, owner);
    assert_eq!(name.as_deref(), Some("chain-context"));
    event_loop.join();
}

#[test]
fn stopped_context_cancels_the_downstream() {
    init_test_logging();
    let event_loop = Arc::new(EventLoop::new().expect("event loop"));
    event_loop.stop();
    let context: Arc<dyn Context> = event_loop;

    let downstream = make_ready_future(1).then_with(ExecutionPolicy::context(context), |x| x);
    assert!(downstream.wait_for_finished().is_ok());
    assert!(downstream.is_canceled());
}

#[test]
fn async_policy_uses_a_fresh_thread() {
    init_test_logging();
    let caller = thread::current().id();
    let downstream = make_ready_future(()).then_with(ExecutionPolicy::Async, move |()| {
        thread::current().id() != caller
    });
    assert!(downstream.result().expect("async continuation"));
}

#[test]
fn inherit_follows_the_run_executor_through_the_chain() {
    init_test_logging();
    let pool = Arc::new(ThreadPool::new(1, 1));
    let caller = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&seen);
    let second = Arc::clone(&seen);
    let end = run(pool.clone(), || 1)
        .then_with(ExecutionPolicy::Inherit, move |x| {
            first.lock().push(thread::current().id());
            x + 1
        })
        .then_with(ExecutionPolicy::Inherit, move |x| {
            second.lock().push(thread::current().id());
            x + 1
        });

    assert_eq!(end.result().expect("inherited chain"), 3);
    assert!(seen.lock().iter().all(|id| *id != caller));
    assert!(pool.shutdown_and_wait(Duration::from_secs(5)));
}

#[test]
fn failure_handler_runs_on_the_pool() {
    init_test_logging();
    let pool = Arc::new(ThreadPool::new(1, 2));
    let caller = thread::current().id();

    let handled = make_exceptional_future::<bool>(Refused)
        .on_failed_with(ExecutionPolicy::pool(pool.clone()), move |_: &Refused| {
            thread::current().id() != caller
        });
    assert!(handled.result().expect("pool failure handler"));

    let caught = make_exceptional_future::<bool>(Refused)
        .on_failed_any_with(ExecutionPolicy::pool(pool.clone()), move |_| {
            thread::current().id() != caller
        });
    assert!(caught.result().expect("pool catch-all"));
    assert!(pool.shutdown_and_wait(Duration::from_secs(5)));
}

#[test]
fn recovery_handlers_run_on_the_context_thread() {
    init_test_logging();
    test_phase!("recovery_on_context");
    let event_loop = Arc::new(EventLoop::with_name("recovery-context").expect("event loop"));
    let owner = event_loop.owning_thread();
    let context: Arc<dyn Context> = event_loop.clone();

    test_section!("on_failed");
    let failed = make_exceptional_future::<Option<thread::ThreadId>>(Refused)
        .try_on_failed_with(ExecutionPolicy::context(Arc::clone(&context)), |_: &Refused| {
            Ok::<_, Exception>(Some(thread::current().id()))
        });
    assert_eq!(failed.result().expect("failure handled"), Some(owner));

    test_section!("on_canceled");
    let (promise, upstream) = started::<Option<thread::ThreadId>>();
    let recovered = upstream
        .on_canceled_with(ExecutionPolicy::context(Arc::clone(&context)), || {
            Some(thread::current().id())
        });
    let inspected = upstream.on_canceled_future_with(
        ExecutionPolicy::context(Arc::clone(&context)),
        |canceled| {
            assert!(canceled.is_canceled());
            Some(thread::current().id())
        },
    );
    upstream.cancel();
    drop(promise);

    assert_eq!(recovered.result().expect("cancel handled"), Some(owner));
    assert_eq!(inspected.result().expect("cancel inspected"), Some(owner));
    event_loop.join();
    test_complete!("recovery_on_context");
}

#[test]
fn inherited_failure_handler_follows_the_run_executor() {
    init_test_logging();
    let pool = Arc::new(ThreadPool::new(1, 1));
    let caller = thread::current().id();

    let failing = run_with_promise(pool.clone(), |promise: &Promise<bool>| {
        promise.report_exception(Refused);
    });
    let handled = failing.on_failed_with(ExecutionPolicy::Inherit, move |_: &Refused| {
        thread::current().id() != caller
    });
    assert!(handled.result().expect("inherited failure handler"));
    assert!(pool.shutdown_and_wait(Duration::from_secs(5)));
}

#[test]
fn when_all_over_chains() {
    init_test_logging();
    let pool = Arc::new(ThreadPool::new(2, 4));
    let chains: Vec<_> = (1..=4)
        .map(|i| run(pool.clone(), move || i).then(|x| x * x))
        .collect();
    let squares: Vec<i32> = when_all(chains)
        .result()
        .expect("all finished")
        .iter()
        .map(|f| f.result().expect("square"))
        .collect();
    assert_eq!(squares, vec![1, 4, 9, 16]);
}
