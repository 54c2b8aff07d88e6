//! Register files of the simulated core, with injectable stuck-at bits.

pub mod flow;

/// Checkerboard patterns driven through every register.
pub const CHECKERBOARD: [u32; 2] = [0x5555_5555, 0xAAAA_AAAA];

/// A bit that always reads back a fixed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckBit {
    pub register: usize,
    pub bit: u32,
    pub value: bool,
}

impl StuckBit {
    fn apply(self, reg: usize, raw: u32) -> u32 {
        if self.register != reg {
            raw
        } else if self.value {
            raw | (1 << self.bit)
        } else {
            raw & !(1 << self.bit)
        }
    }
}

pub trait RegisterFile {
    fn write_raw(&mut self, reg: usize, value: u32);
    fn read_raw(&self, reg: usize) -> u32;
}

/// Write each pattern into all `regs`, then read them all back.
pub fn checkerboard<R: RegisterFile + ?Sized>(file: &mut R, regs: &[usize]) -> bool {
    for pattern in CHECKERBOARD {
        for &r in regs {
            file.write_raw(r, pattern);
        }
        for &r in regs {
            let got = file.read_raw(r);
            if got != pattern {
                tracing::debug!("Register {} read {:#x}, expected {:#x}", r, got, pattern);
                return false;
            }
        }
    }
    true
}

/// General-purpose core registers r0-r12, sp, lr.
#[derive(Debug, Default)]
pub struct CortexM {
    regs: [u32; 15],
    stuck: Option<StuckBit>,
}

impl CortexM {
    pub const SP: usize = 13;
    pub const LR: usize = 14;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stuck_bit(stuck: StuckBit) -> Self {
        Self {
            stuck: Some(stuck),
            ..Self::default()
        }
    }

    /// Checkerboard every register except SP, which the core is running on.
    /// Original contents are put back afterwards.
    pub fn register_test(&mut self) -> bool {
        let saved = self.regs;
        let testable: Vec<usize> = (0..self.regs.len()).filter(|&r| r != Self::SP).collect();
        let ok = checkerboard(self, &testable);
        self.regs = saved;
        ok
    }
}

impl RegisterFile for CortexM {
    fn write_raw(&mut self, reg: usize, value: u32) {
        self.regs[reg] = value;
    }

    fn read_raw(&self, reg: usize) -> u32 {
        match self.stuck {
            Some(s) => s.apply(reg, self.regs[reg]),
            None => self.regs[reg],
        }
    }
}

/// Single-precision FPU registers s0-s31.
#[derive(Debug, Default)]
pub struct Fpu {
    regs: [u32; 32],
    stuck: Option<StuckBit>,
}

impl Fpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stuck_bit(stuck: StuckBit) -> Self {
        Self {
            stuck: Some(stuck),
            ..Self::default()
        }
    }

    pub fn write(&mut self, reg: usize, value: f32) {
        self.write_raw(reg, value.to_bits());
    }

    pub fn read(&self, reg: usize) -> f32 {
        f32::from_bits(self.read_raw(reg))
    }

    pub fn register_test(&mut self) -> bool {
        let saved = self.regs;
        let all: Vec<usize> = (0..self.regs.len()).collect();
        let ok = checkerboard(self, &all);
        self.regs = saved;
        ok
    }
}

impl RegisterFile for Fpu {
    fn write_raw(&mut self, reg: usize, value: u32) {
        self.regs[reg] = value;
    }

    fn read_raw(&self, reg: usize) -> u32 {
        match self.stuck {
            Some(s) => s.apply(reg, self.regs[reg]),
            None => self.regs[reg],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_test_restores_contents() {
        let mut cpu = CortexM::new();
        cpu.write_raw(0, 0xDEAD_BEEF);
        assert!(cpu.register_test());
        assert_eq!(cpu.read_raw(0), 0xDEAD_BEEF);
    }

    #[test]
    fn test_stuck_bit_detected() {
        let mut cpu = CortexM::with_stuck_bit(StuckBit {
            register: 7,
            bit: 3,
            value: false,
        });
        assert!(!cpu.register_test());

        let mut fpu = Fpu::with_stuck_bit(StuckBit {
            register: 5,
            bit: 30,
            value: true,
        });
        assert!(!fpu.register_test());
    }

    #[test]
    fn test_fpu_round_trips_floats() {
        let mut fpu = Fpu::new();
        fpu.write(2, 1.5);
        assert_eq!(fpu.read(2), 1.5);
        assert!(fpu.register_test());
    }
}
