use crate::sequencer::TestRecord;
use crate::{Diagnostic, TestId, TestResult};
use serde::{Deserialize, Serialize};

/// What one test ended with, kept after its row has been printed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub index: u32,
    pub test: TestId,
    pub name: String,
    pub result: TestResult,
    pub progress: Option<u32>,
    pub invocations: u64,
    pub diagnostic: Option<Diagnostic>,
}

impl TestOutcome {
    pub fn new(test: TestId, record: TestRecord) -> Self {
        Self {
            index: record.index,
            test,
            name: record.name,
            result: record.result,
            progress: record.progress,
            invocations: record.invocations,
            diagnostic: record.diagnostic,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunSummary {
    pub board: String,
    /// Index the next test would have been given.
    pub final_index: u32,
    pub covered: u32,
    pub passed: u32,
    pub failed: u32,
    pub outcomes: Vec<TestOutcome>,
    #[serde(default)]
    pub firmware_hash: Option<String>,
}

impl RunSummary {
    pub fn new(board: &str, final_index: u32, outcomes: Vec<TestOutcome>) -> Self {
        let passed = outcomes.iter().filter(|o| o.result.is_success()).count() as u32;
        Self {
            board: board.to_string(),
            final_index,
            covered: final_index - 1,
            passed,
            failed: outcomes.len() as u32 - passed,
            outcomes,
            firmware_hash: None,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|o| !o.result.is_success())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
