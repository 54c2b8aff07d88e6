/// Free-running watchdog counter with a match value and a latched reset cause.
#[derive(Debug, Default)]
pub struct Watchdog {
    enabled: bool,
    locked: bool,
    counter: u32,
    match_value: u32,
    interrupt: bool,
    reset_latched: bool,
    /// Counter clock is dead; the watchdog can never expire.
    pub broken: bool,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn enable(&mut self, match_value: u32) -> bool {
        if self.locked {
            return false;
        }
        self.match_value = match_value;
        self.counter = 0;
        self.enabled = true;
        true
    }

    pub fn disable(&mut self) -> bool {
        if self.locked {
            return false;
        }
        self.enabled = false;
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn feed(&mut self) {
        self.counter = 0;
    }

    pub fn clear_interrupt(&mut self) {
        self.interrupt = false;
    }

    pub fn reset_latched(&self) -> bool {
        self.reset_latched
    }

    pub fn clear_reset_reason(&mut self) {
        self.reset_latched = false;
    }

    /// First match raises the interrupt; a second unserviced match latches a reset.
    pub fn tick(&mut self) {
        if !self.enabled || self.broken {
            return;
        }
        self.counter += 1;
        if self.counter >= self.match_value {
            self.counter = 0;
            if self.interrupt {
                self.reset_latched = true;
            } else {
                self.interrupt = true;
            }
        }
    }

    /// Starve the watchdog and check it bites within two match periods.
    pub fn expiry_test(&mut self, match_value: u32) -> bool {
        self.unlock();
        self.clear_reset_reason();
        self.clear_interrupt();
        if !self.enable(match_value) {
            return false;
        }
        for _ in 0..match_value.saturating_mul(2) {
            self.tick();
        }
        let bit = self.reset_latched();
        self.clear_interrupt();
        self.clear_reset_reason();
        self.disable();
        bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        assert!(Watchdog::new().expiry_test(64));
        let mut broken = Watchdog::new();
        broken.broken = true;
        assert!(!broken.expiry_test(64));
    }

    #[test]
    fn test_locked_configuration() {
        let mut wdt = Watchdog::new();
        assert!(wdt.enable(10));
        wdt.lock();
        assert!(!wdt.disable());
        wdt.unlock();
        assert!(wdt.disable());
    }
}
