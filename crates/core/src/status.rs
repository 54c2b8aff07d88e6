use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw status byte handed back by a diagnostic primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u8);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);
    pub const ERROR: StatusCode = StatusCode(1);
    pub const PASS_STILL_TESTING: StatusCode = StatusCode(2);
    pub const PASS_COMPLETE: StatusCode = StatusCode(3);

    pub fn from_ok(ok: bool) -> Self {
        if ok {
            Self::OK
        } else {
            Self::ERROR
        }
    }
}

/// Outcome of one primitive invocation as seen by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Ok,
    Error,
    PassComplete,
    PassStillTesting,
}

impl TestResult {
    /// `Ok` and `PassComplete` are both success.
    pub fn is_success(self) -> bool {
        matches!(self, TestResult::Ok | TestResult::PassComplete)
    }

    pub fn is_terminal(self) -> bool {
        self != TestResult::PassStillTesting
    }

    pub fn label(self) -> &'static str {
        match self {
            TestResult::Ok | TestResult::PassComplete => "SUCCESS",
            TestResult::PassStillTesting => "IN PROGRESS",
            TestResult::Error => "ERROR",
        }
    }
}

impl From<StatusCode> for TestResult {
    /// Anything outside the four known codes counts as a failure.
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::OK => TestResult::Ok,
            StatusCode::PASS_COMPLETE => TestResult::PassComplete,
            StatusCode::PASS_STILL_TESTING => TestResult::PassStillTesting,
            _ => TestResult::Error,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

bitflags::bitflags! {
    /// Guard-pattern corruption found by the stack bounds check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StackFault: u8 {
        /// Pattern past the stack top (deepest block) was overwritten.
        const OVERFLOW  = 1 << 0;
        /// Pattern below the stack floor (block at the initial SP) was overwritten.
        const UNDERFLOW = 1 << 1;
    }
}

/// How a stack bounds check is reported. Overflow wins when both are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackVerdict {
    Intact,
    Overflow,
    Underflow,
}

impl StackVerdict {
    pub fn classify(fault: StackFault) -> Self {
        if fault.contains(StackFault::OVERFLOW) {
            StackVerdict::Overflow
        } else if fault.contains(StackFault::UNDERFLOW) {
            StackVerdict::Underflow
        } else {
            StackVerdict::Intact
        }
    }

    pub fn result(self) -> TestResult {
        match self {
            StackVerdict::Intact => TestResult::Ok,
            StackVerdict::Overflow | StackVerdict::Underflow => TestResult::Error,
        }
    }

    pub fn row_name(self) -> &'static str {
        match self {
            StackVerdict::Intact => "Stack Memory Test",
            StackVerdict::Overflow => "Stack Overflow Test",
            StackVerdict::Underflow => "Stack Underflow Test",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(TestResult::from(StatusCode::OK), TestResult::Ok);
        assert_eq!(TestResult::from(StatusCode::ERROR), TestResult::Error);
        assert_eq!(
            TestResult::from(StatusCode::PASS_STILL_TESTING),
            TestResult::PassStillTesting
        );
        assert_eq!(
            TestResult::from(StatusCode::PASS_COMPLETE),
            TestResult::PassComplete
        );
        assert_eq!(TestResult::from(StatusCode(0x7F)), TestResult::Error);
    }

    #[test]
    fn test_success_labels() {
        assert_eq!(TestResult::Ok.label(), TestResult::PassComplete.label());
        assert!(TestResult::PassComplete.is_success());
        assert!(!TestResult::PassStillTesting.is_terminal());
        assert!(TestResult::Error.is_terminal());
    }

    #[test]
    fn test_stack_verdict_never_both() {
        let both = StackFault::OVERFLOW | StackFault::UNDERFLOW;
        assert_eq!(StackVerdict::classify(both), StackVerdict::Overflow);
        assert_eq!(
            StackVerdict::classify(StackFault::UNDERFLOW),
            StackVerdict::Underflow
        );
        assert_eq!(
            StackVerdict::classify(StackFault::empty()),
            StackVerdict::Intact
        );
        assert_eq!(StackVerdict::Underflow.result(), TestResult::Error);
    }
}
