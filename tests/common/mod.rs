#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use fulfil::{Future, Promise, Watcher};
use parking_lot::Mutex;
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::Once;
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "FULFIL_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    std::env::var("CI").ok().map(|_| DEFAULT_PROPTEST_SEED)
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// A promise that has already been started, plus one of its futures.
pub fn started<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let promise = Promise::new();
    let future = promise.future();
    promise.start();
    (promise, future)
}

/// Polls `condition` until it holds; panics after `timeout`.
pub fn wait_until(description: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition '{description}' not reached within {timeout:?}"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// A notification seen by [`RecordingWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Started,
    ResultReadyAt(usize, usize),
    ProgressRange(i32, i32),
    Progress(i32, Option<String>),
    Suspending,
    Suspended,
    Resumed,
    Canceled,
    Finished,
}

/// Records every notification in arrival order.
#[derive(Debug, Default)]
pub struct RecordingWatcher {
    seen: Mutex<Vec<Seen>>,
}

impl RecordingWatcher {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn count(&self, wanted: &Seen) -> usize {
        self.seen.lock().iter().filter(|s| *s == wanted).count()
    }

    fn push(&self, seen: Seen) {
        self.seen.lock().push(seen);
    }
}

impl Watcher for RecordingWatcher {
    fn on_started(&self) {
        self.push(Seen::Started);
    }

    fn on_result_ready_at(&self, begin: usize, end: usize) {
        self.push(Seen::ResultReadyAt(begin, end));
    }

    fn on_progress_range(&self, minimum: i32, maximum: i32) {
        self.push(Seen::ProgressRange(minimum, maximum));
    }

    fn on_progress(&self, value: i32, text: Option<&str>) {
        self.push(Seen::Progress(value, text.map(str::to_owned)));
    }

    fn on_suspending(&self) {
        self.push(Seen::Suspending);
    }

    fn on_suspended(&self) {
        self.push(Seen::Suspended);
    }

    fn on_resumed(&self) {
        self.push(Seen::Resumed);
    }

    fn on_canceled(&self) {
        self.push(Seen::Canceled);
    }

    fn on_finished(&self) {
        self.push(Seen::Finished);
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
