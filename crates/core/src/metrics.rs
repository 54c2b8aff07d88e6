use crate::sequencer::TestRecord;
use crate::{SequenceObserver, TestId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RunMetrics {
    tests_started: AtomicU64,
    tests_passed: AtomicU64,
    tests_failed: AtomicU64,
    invocations: AtomicU64,
    start_time: Mutex<Option<Instant>>,
    elapsed: Mutex<Option<Duration>>,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            tests_started: AtomicU64::new(0),
            tests_passed: AtomicU64::new(0),
            tests_failed: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            start_time: Mutex::new(None),
            elapsed: Mutex::new(None),
        }
    }

    pub fn reset(&self) {
        self.tests_started.store(0, Ordering::SeqCst);
        self.tests_passed.store(0, Ordering::SeqCst);
        self.tests_failed.store(0, Ordering::SeqCst);
        self.invocations.store(0, Ordering::SeqCst);
    }

    pub fn get_tests_started(&self) -> u64 {
        self.tests_started.load(Ordering::SeqCst)
    }

    pub fn get_passed(&self) -> u64 {
        self.tests_passed.load(Ordering::SeqCst)
    }

    pub fn get_failed(&self) -> u64 {
        self.tests_failed.load(Ordering::SeqCst)
    }

    /// Primitive calls across all tests, every poll included.
    pub fn get_invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Wall time of the last finished run.
    pub fn get_elapsed(&self) -> Option<Duration> {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SequenceObserver for RunMetrics {
    fn on_run_start(&self, _planned: usize) {
        self.reset();
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    fn on_test_start(&self, _index: u32, _test: TestId) {
        self.tests_started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_test_end(&self, record: &TestRecord) {
        if record.result.is_success() {
            self.tests_passed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.tests_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.invocations.fetch_add(record.invocations, Ordering::SeqCst);
    }

    fn on_run_end(&self, _covered: u32) {
        let start = *self.start_time.lock().unwrap_or_else(|e| e.into_inner());
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner()) = start.map(|s| s.elapsed());
    }
}
