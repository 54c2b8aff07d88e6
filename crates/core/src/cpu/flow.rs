//! Program counter and program-flow checks for the simulated core.

type Target = fn() -> u32;

fn target_a() -> u32 {
    0x0000_0A0A
}

fn target_b() -> u32 {
    0x0000_0B0B
}

fn target_c() -> u32 {
    0x0000_0C0C
}

fn target_d() -> u32 {
    0x0000_0D0D
}

fn target_misrouted() -> u32 {
    0x0000_0E0E
}

const EXPECTED_TAGS: [u32; 4] = [0x0A0A, 0x0B0B, 0x0C0C, 0x0D0D];

/// Branches through a table of functions; each must come back with its own tag.
#[derive(Debug, Clone)]
pub struct ProgramCounterCheck {
    table: [Target; 4],
}

impl ProgramCounterCheck {
    pub fn new() -> Self {
        Self {
            table: [target_a, target_b, target_c, target_d],
        }
    }

    /// A jump in the table lands on the wrong function.
    pub fn misrouted() -> Self {
        Self {
            table: [target_a, target_b, target_misrouted, target_d],
        }
    }

    pub fn run(&self) -> bool {
        self.table
            .iter()
            .zip(EXPECTED_TAGS)
            .all(|(target, tag)| target() == tag)
    }
}

impl Default for ProgramCounterCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// Checkpoint constants folded into the flow signature, in execution order.
const CHECKPOINTS: [u32; 6] = [0x11, 0x23, 0x35, 0x47, 0x59, 0x6B];

fn fold(signature: u32, checkpoint: u32) -> u32 {
    signature.rotate_left(5) ^ checkpoint
}

/// Signature the flow must produce when every checkpoint runs once, in order.
pub fn expected_flow_signature() -> u32 {
    CHECKPOINTS.iter().fold(0, |sig, &cp| fold(sig, cp))
}

/// Runs the checkpoint chain, optionally skipping one block.
#[derive(Debug, Clone, Default)]
pub struct ProgramFlowCheck {
    pub skipped_checkpoint: Option<usize>,
}

impl ProgramFlowCheck {
    pub fn run(&self) -> bool {
        let signature = CHECKPOINTS
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != self.skipped_checkpoint)
            .fold(0, |sig, (_, &cp)| fold(sig, cp));
        signature == expected_flow_signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_counter() {
        assert!(ProgramCounterCheck::new().run());
        assert!(!ProgramCounterCheck::misrouted().run());
    }

    #[test]
    fn test_program_flow() {
        assert!(ProgramFlowCheck::default().run());
        let skipped = ProgramFlowCheck {
            skipped_checkpoint: Some(3),
        };
        assert!(!skipped.run());
    }
}
