use crate::adapter::{
    run_guarded, run_polling, run_single_shot, run_stack_bounds, BoardPoll, PollBudget,
};
use crate::report::Reporter;
use crate::summary::{RunSummary, TestOutcome};
use crate::{Board, Diagnostic, EngineResult, SequenceObserver, SramTestMode, TestId, TestResult};
use bootcheck_config::BoardManifest;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// Row number for the next test. Starts at 1 and moves once per finished test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CoverageIndex(u32);

impl CoverageIndex {
    pub fn start() -> Self {
        Self(1)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Tests completed so far; the index always points one past the last.
    pub fn covered(self) -> u32 {
        self.0 - 1
    }
}

impl Default for CoverageIndex {
    fn default() -> Self {
        Self::start()
    }
}

/// One rendered row worth of result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub index: u32,
    pub name: String,
    pub result: TestResult,
    /// Progress counter, only for polling tests.
    pub progress: Option<u32>,
    pub invocations: u64,
    pub diagnostic: Option<Diagnostic>,
}

impl TestRecord {
    pub fn new(index: CoverageIndex, name: &str, result: TestResult) -> Self {
        Self {
            index: index.value(),
            name: name.to_string(),
            result,
            progress: None,
            invocations: 0,
            diagnostic: None,
        }
    }
}

/// Which adapter a test runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    SingleShot,
    Polling,
    Guarded,
    StackBounds,
}

impl Execution {
    pub fn of(test: TestId) -> Self {
        match test {
            TestId::Clock | TestId::Flash => Execution::Polling,
            TestId::Sram | TestId::StackMarch => Execution::Guarded,
            TestId::StackBounds => Execution::StackBounds,
            _ => Execution::SingleShot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    NotStarted,
    /// Position in the plan of the test being executed.
    Running(usize),
    Finished,
    /// A test's setup failed; nothing after it ran.
    Halted(usize),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub board_name: String,
    pub sram_mode: SramTestMode,
    pub poll_budget: PollBudget,
    pub settle_delay_ms: u32,
    pub clear_screen: bool,
}

impl RunOptions {
    pub fn from_manifest(manifest: &BoardManifest) -> Self {
        Self {
            board_name: manifest.name.clone(),
            sram_mode: manifest.sram_test.mode,
            poll_budget: PollBudget::from_limit(manifest.limits.max_polls),
            settle_delay_ms: manifest.limits.settle_delay_ms,
            clear_screen: false,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_manifest(&BoardManifest::default())
    }
}

#[derive(Debug)]
pub struct Sequencer {
    plan: Vec<TestId>,
    options: RunOptions,
    state: SequencerState,
    observers: Vec<Arc<dyn SequenceObserver>>,
}

impl Sequencer {
    pub fn new(plan: Vec<TestId>, options: RunOptions) -> Self {
        Self {
            plan,
            options,
            state: SequencerState::NotStarted,
            observers: Vec::new(),
        }
    }

    pub fn from_manifest(manifest: &BoardManifest) -> Self {
        Self::new(manifest.plan(), RunOptions::from_manifest(manifest))
    }

    pub fn clear_screen_first(&mut self) {
        self.options.clear_screen = true;
    }

    pub fn add_observer(&mut self, observer: Arc<dyn SequenceObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Run every planned test in order, whatever the earlier ones reported.
    pub fn run<B: Board + ?Sized, W: Write>(
        &mut self,
        board: &mut B,
        reporter: &mut Reporter<W>,
    ) -> EngineResult<RunSummary> {
        info!(
            "Starting self-test sequence on {} ({} tests)",
            self.options.board_name,
            self.plan.len()
        );
        for observer in &self.observers {
            observer.on_run_start(self.plan.len());
        }

        if self.options.clear_screen {
            reporter.clear_screen()?;
        }
        reporter.banner(&self.options.board_name)?;

        let mut coverage = CoverageIndex::start();
        let mut outcomes = Vec::with_capacity(self.plan.len());

        for position in 0..self.plan.len() {
            let test = self.plan[position];
            self.state = SequencerState::Running(position);
            for observer in &self.observers {
                observer.on_test_start(coverage.value(), test);
            }

            let record = match self.run_test(test, coverage, board, reporter) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Halting sequence at {:?}: {}", test, e);
                    self.state = SequencerState::Halted(position);
                    return Err(e);
                }
            };

            if !record.result.is_success() {
                warn!("{} reported {}", record.name, record.result);
            }
            for observer in &self.observers {
                observer.on_test_end(&record);
            }
            outcomes.push(TestOutcome::new(test, record));
            coverage = coverage.next();
        }

        self.state = SequencerState::Finished;
        reporter.footer(coverage.covered())?;
        for observer in &self.observers {
            observer.on_run_end(coverage.covered());
        }
        info!("Self-test sequence finished, {} tests covered", coverage.covered());

        Ok(RunSummary::new(
            &self.options.board_name,
            coverage.value(),
            outcomes,
        ))
    }

    fn run_test<B: Board + ?Sized, W: Write>(
        &self,
        test: TestId,
        index: CoverageIndex,
        board: &mut B,
        reporter: &mut Reporter<W>,
    ) -> EngineResult<TestRecord> {
        let name = test.display_name(self.options.sram_mode);

        let record = match Execution::of(test) {
            Execution::SingleShot => {
                board.prepare(test)?;
                run_single_shot(reporter, index, name, || board.run(test))?
            }
            Execution::Polling => {
                board.prepare(test)?;
                let mut poller = BoardPoll {
                    board: &mut *board,
                    test,
                };
                run_polling(reporter, index, name, self.options.poll_budget, &mut poller)?
            }
            Execution::Guarded => {
                board.prepare(test)?;
                let irq = board.interrupt_control();
                run_guarded(reporter, index, name, irq.as_ref(), || board.run(test))?
            }
            Execution::StackBounds => {
                run_stack_bounds(reporter, index, board, self.options.settle_delay_ms)?
            }
        };

        board.finish(test);
        Ok(record)
    }
}
