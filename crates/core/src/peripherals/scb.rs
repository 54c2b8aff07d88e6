/// System Control Block registers checked by the start-up configuration test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scb {
    pub vtor: u32,
    pub aircr: u32,
    pub ccr: u32,
    pub shcsr: u32,
    pub cpacr: u32,
}

impl Scb {
    /// Register values left by the boot code.
    pub fn boot_defaults(vector_table: u32) -> Self {
        Self {
            vtor: vector_table,
            aircr: 0xFA05_0000,
            ccr: 0x0000_0200,
            shcsr: 0x0007_0000,
            cpacr: 0x00F0_0000, // CP10/CP11 full access
        }
    }
}

/// Copy of the start-up configuration, taken right after boot.
#[derive(Debug)]
pub struct StartupRegisters {
    saved: Option<Scb>,
}

impl StartupRegisters {
    pub fn new() -> Self {
        Self { saved: None }
    }

    pub fn save(&mut self, scb: &Scb) {
        self.saved = Some(*scb);
    }

    /// A configuration that was never saved cannot be verified.
    pub fn verify(&self, current: &Scb) -> bool {
        match &self.saved {
            Some(saved) => {
                if saved != current {
                    tracing::debug!("Start-up registers drifted: {:x?} -> {:x?}", saved, current);
                }
                saved == current
            }
            None => false,
        }
    }
}

impl Default for StartupRegisters {
    fn default() -> Self {
        Self::new()
    }
}
