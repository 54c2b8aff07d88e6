pub mod adapter;
pub mod board;
pub mod cpu;
pub mod guard;
pub mod memory;
pub mod metrics;
pub mod peripherals;
pub mod report;
pub mod sequencer;
pub mod status;
pub mod summary;

use std::sync::Arc;

pub use bootcheck_config::{Fault, SramTestMode, TestId};
pub use status::{StackFault, StackVerdict, StatusCode, TestResult};


#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Initialization of {test:?} failed: {reason}")]
    Init { test: TestId, reason: String },
    #[error("Console write failed: {0}")]
    Console(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Global interrupt enable, shared between the board and the memory-test guard.
pub trait InterruptControl: std::fmt::Debug + Send + Sync {
    fn interrupts_enabled(&self) -> bool;
    fn set_interrupts_enabled(&self, enabled: bool);
}

/// Secondary information printed next to a failing row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Diagnostic {
    FlashChecksum {
        algorithm: bootcheck_config::ChecksumAlgorithm,
        value: u64,
    },
    PollBudgetExhausted {
        polls: u64,
    },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use bootcheck_config::ChecksumAlgorithm;
        match self {
            Diagnostic::FlashChecksum {
                algorithm: ChecksumAlgorithm::Fletcher64,
                value,
            } => write!(f, "FLASH CHECKSUM: 0x{:016X}", value),
            Diagnostic::FlashChecksum {
                algorithm: ChecksumAlgorithm::Crc32,
                value,
            } => write!(f, "FLASH CRC: 0x{:08X}", value),
            Diagnostic::PollBudgetExhausted { polls } => {
                write!(f, "POLL BUDGET EXHAUSTED after {} polls", polls)
            }
        }
    }
}

/// The diagnostic primitives library of a target board.
///
/// The sequencer never looks inside a primitive: it only calls these hooks in
/// a fixed order and interprets the returned status codes.
pub trait Board {
    /// Handle to the global interrupt mask used to guard destructive tests.
    fn interrupt_control(&self) -> Arc<dyn InterruptControl>;

    /// Test-specific setup. An error here is fatal to the whole run.
    fn prepare(&mut self, _test: TestId) -> EngineResult<()> {
        Ok(())
    }

    /// Invoke the primitive for `test` once.
    fn run(&mut self, test: TestId) -> StatusCode;

    /// Test-specific teardown, after the final invocation.
    fn finish(&mut self, _test: TestId) {}

    /// Write the guard pattern into the stack bounds blocks.
    fn seed_stack(&mut self);

    /// Verify the guard pattern written by [`Board::seed_stack`].
    fn check_stack(&mut self) -> StackFault;

    /// Extra detail about the last failing invocation, if the primitive has any.
    fn diagnostic(&self, _test: TestId) -> Option<Diagnostic> {
        None
    }

    fn delay_ms(&mut self, _ms: u32) {}
}

/// Trait for observing the sequence in a modular way.
pub trait SequenceObserver: std::fmt::Debug + Send + Sync {
    fn on_run_start(&self, _planned: usize) {}
    fn on_test_start(&self, _index: u32, _test: TestId) {}
    fn on_test_end(&self, _record: &sequencer::TestRecord) {}
    fn on_run_end(&self, _covered: u32) {}
}
