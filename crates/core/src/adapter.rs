//! Adapters turning a primitive's status codes into exactly one terminal row.

use crate::guard::with_interrupts_masked;
use crate::report::{LoopControl, Reporter};
use crate::sequencer::{CoverageIndex, TestRecord};
use crate::{
    Board, Diagnostic, EngineResult, InterruptControl, StackVerdict, StatusCode, TestId, TestResult,
};
use std::io::Write;
use tracing::{debug, warn};

/// Highest value the progress counter shows before wrapping to 0.
pub const PROGRESS_CEILING: u16 = 0xFFF0;

/// Per-test count of unsuccessful polls, as shown on in-progress rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressCounter(u16);

impl ProgressCounter {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn advance(&mut self) {
        self.0 = if self.0 >= PROGRESS_CEILING {
            0
        } else {
            self.0 + 1
        };
    }
}

/// Cap on primitive invocations for one polling test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollBudget {
    #[default]
    Unbounded,
    Limited(u64),
}

impl PollBudget {
    pub fn from_limit(max_polls: Option<u64>) -> Self {
        max_polls.map_or(PollBudget::Unbounded, PollBudget::Limited)
    }

    fn exhausted(self, polls: u64) -> bool {
        matches!(self, PollBudget::Limited(max) if polls >= max)
    }
}

/// A primitive that may need several invocations to reach a verdict.
pub trait PollingPrimitive {
    fn poll(&mut self) -> StatusCode;

    fn diagnostic(&self) -> Option<Diagnostic> {
        None
    }
}

/// Polls one board test through the generic [`Board`] hooks.
pub struct BoardPoll<'a, B: Board + ?Sized> {
    pub board: &'a mut B,
    pub test: TestId,
}

impl<B: Board + ?Sized> PollingPrimitive for BoardPoll<'_, B> {
    fn poll(&mut self) -> StatusCode {
        self.board.run(self.test)
    }

    fn diagnostic(&self) -> Option<Diagnostic> {
        self.board.diagnostic(self.test)
    }
}

/// Whatever the primitive returns first is final.
pub fn run_single_shot<W: Write>(
    reporter: &mut Reporter<W>,
    index: CoverageIndex,
    name: &str,
    primitive: impl FnOnce() -> StatusCode,
) -> EngineResult<TestRecord> {
    let mut record = TestRecord::new(index, name, TestResult::from(primitive()));
    record.invocations = 1;
    // A one-shot primitive has no later call to finish the test with.
    if record.result == TestResult::PassStillTesting {
        warn!("{} returned PASS_STILL_TESTING from a single-shot call", name);
        record.result = TestResult::Error;
    }
    reporter.row(&record)?;
    Ok(record)
}

/// Single invocation with global interrupts masked for its whole duration.
pub fn run_guarded<W: Write>(
    reporter: &mut Reporter<W>,
    index: CoverageIndex,
    name: &str,
    irq: &dyn InterruptControl,
    primitive: impl FnOnce() -> StatusCode,
) -> EngineResult<TestRecord> {
    let status = with_interrupts_masked(irq, primitive);
    run_single_shot(reporter, index, name, || status)
}

/// Invoke until the primitive reports a terminal status or the budget runs out.
pub fn run_polling<W: Write, P: PollingPrimitive + ?Sized>(
    reporter: &mut Reporter<W>,
    index: CoverageIndex,
    name: &str,
    budget: PollBudget,
    primitive: &mut P,
) -> EngineResult<TestRecord> {
    let mut counter = ProgressCounter::new();
    let mut polls: u64 = 0;

    loop {
        if budget.exhausted(polls) {
            warn!("{} still testing after {} polls, giving up", name, polls);
            let mut record = TestRecord::new(index, name, TestResult::Error);
            record.progress = Some(counter.value() as u32);
            record.invocations = polls;
            record.diagnostic = Some(Diagnostic::PollBudgetExhausted { polls });
            reporter.row(&record)?;
            return Ok(record);
        }

        let result = TestResult::from(primitive.poll());
        polls += 1;

        let mut record = TestRecord::new(index, name, result);
        record.progress = Some(counter.value() as u32);
        record.invocations = polls;
        if result == TestResult::Error {
            record.diagnostic = primitive.diagnostic();
        }

        match reporter.row(&record)? {
            LoopControl::Continue => {
                debug!("{} in progress, count={}", name, counter.value());
                counter.advance();
            }
            LoopControl::Break => return Ok(record),
        }
    }
}

/// Seed the stack guard pattern, check it, and report which bound was crossed.
pub fn run_stack_bounds<W: Write, B: Board + ?Sized>(
    reporter: &mut Reporter<W>,
    index: CoverageIndex,
    board: &mut B,
    settle_delay_ms: u32,
) -> EngineResult<TestRecord> {
    board.seed_stack();
    let fault = board.check_stack();
    let verdict = StackVerdict::classify(fault);
    if verdict != StackVerdict::Intact {
        warn!("Stack guard pattern corrupted: {:?} ({:?})", verdict, fault);
    }

    let mut record = TestRecord::new(index, verdict.row_name(), verdict.result());
    record.invocations = 1;
    reporter.row(&record)?;
    board.delay_ms(settle_delay_ms);
    Ok(record)
}
