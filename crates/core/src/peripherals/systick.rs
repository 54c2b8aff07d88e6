use crate::StatusCode;

/// SysTick-style down-counter clocked by the independent reference oscillator.
/// Standard register offsets: CSR 0x00, RVR 0x04, CVR 0x08, CALIB 0x0C.
#[derive(Debug, Default)]
pub struct Systick {
    csr: u32,
    rvr: u32,
    cvr: u32,
    calib: u32,
}

impl Systick {
    pub fn new() -> Self {
        Self {
            csr: 0,
            rvr: 0,
            cvr: 0,
            calib: 0x4000_0000, // No reference clock, no skew
        }
    }

    pub fn read(&self, offset: u64) -> u32 {
        match offset {
            0x00 => self.csr,
            0x04 => self.rvr,
            0x08 => self.cvr,
            0x0C => self.calib,
            _ => 0,
        }
    }

    pub fn write(&mut self, offset: u64, value: u32) {
        match offset {
            0x00 => {
                // CSR: Only ENABLE (bit 0), TICKINT (bit 1), CLKSOURCE (bit 2) are writable
                self.csr = value & 0x7;
            }
            0x04 => {
                // RVR: 24-bit reload value
                self.rvr = value & 0x00FF_FFFF;
            }
            0x08 => {
                // CVR: Write clears value and COUNTFLAG
                self.cvr = 0;
                self.csr &= !0x10000;
            }
            _ => {}
        }
    }

    pub fn is_enabled(&self) -> bool {
        (self.csr & 0x1) != 0
    }

    /// Advance the timer by one reference tick. Returns true when it wraps
    /// with its interrupt enabled.
    pub fn tick(&mut self) -> bool {
        if !self.is_enabled() {
            return false;
        }

        if self.cvr == 0 {
            self.cvr = self.rvr;
            self.csr |= 0x10000;
            (self.csr & 0x2) != 0
        } else {
            self.cvr -= 1;
            false
        }
    }

    /// Program a periodic interrupt every `ticks` reference ticks and sync to
    /// the first wrap.
    pub fn start_periodic(&mut self, ticks: u32) {
        self.write(0x04, ticks.saturating_sub(1));
        self.write(0x08, 0);
        self.write(0x00, 0b011);
        self.tick();
    }

    pub fn stop(&mut self) {
        self.write(0x00, 0);
    }
}

/// Cross-checks the CPU clock against the reference timer, one slot per poll.
#[derive(Debug)]
pub struct ClockMonitor {
    pub timer: Systick,
    /// Actual core frequency, including any skew.
    pub cpu_hz: u64,
    /// Frequency the firmware was built for.
    pub nominal_cpu_hz: u64,
    pub reference_hz: u64,
    pub slot_ticks: u32,
    pub samples_needed: u32,
    pub tolerance_percent: u32,
    /// Timer never gets enabled, so no slot ever completes.
    pub stalled: bool,
    samples: Vec<u64>,
}

impl ClockMonitor {
    pub fn new(
        nominal_cpu_hz: u64,
        skew_percent: i32,
        reference_hz: u64,
        slot_ticks: u32,
        samples_needed: u32,
        tolerance_percent: u32,
    ) -> Self {
        let cpu_hz = (nominal_cpu_hz as i128 * (100 + skew_percent as i128) / 100) as u64;
        Self {
            timer: Systick::new(),
            cpu_hz,
            nominal_cpu_hz,
            reference_hz,
            slot_ticks,
            samples_needed,
            tolerance_percent,
            stalled: false,
            samples: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.samples.clear();
        if !self.stalled {
            self.timer.start_periodic(self.slot_ticks);
        }
    }

    pub fn stop(&mut self) {
        self.timer.stop();
    }

    /// CPU cycles expected in one slot at the nominal frequency.
    pub fn expected_cycles(&self) -> u64 {
        (self.slot_ticks as u64).saturating_mul(self.nominal_cpu_hz) / self.reference_hz
    }

    pub fn poll(&mut self) -> StatusCode {
        if !self.timer.is_enabled() {
            return StatusCode::PASS_STILL_TESTING;
        }

        // Count reference ticks up to the next slot interrupt.
        let mut ticks: u64 = 0;
        loop {
            ticks += 1;
            if self.timer.tick() {
                break;
            }
        }
        let cycles = ticks.saturating_mul(self.cpu_hz) / self.reference_hz;
        self.samples.push(cycles);
        tracing::debug!("Clock slot {}: {} cycles", self.samples.len(), cycles);

        if (self.samples.len() as u32) < self.samples_needed {
            return StatusCode::PASS_STILL_TESTING;
        }

        let expected = self.expected_cycles();
        let allowed = expected.saturating_mul(self.tolerance_percent as u64) / 100;
        let ok = self.samples.iter().all(|&c| c.abs_diff(expected) <= allowed);
        self.samples.clear();
        if ok {
            StatusCode::PASS_COMPLETE
        } else {
            StatusCode::ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periodic_wrap_every_slot() {
        let mut timer = Systick::new();
        timer.start_periodic(4);
        let fired: Vec<bool> = (0..8).map(|_| timer.tick()).collect();
        assert_eq!(
            fired,
            vec![false, false, false, true, false, false, false, true]
        );
        assert_ne!(timer.read(0x00) & 0x10000, 0);
    }

    #[test]
    fn test_clock_monitor_in_tolerance() {
        let mut monitor = ClockMonitor::new(180_000_000, 2, 32_000, 32, 3, 5);
        monitor.start();
        assert_eq!(monitor.poll(), StatusCode::PASS_STILL_TESTING);
        assert_eq!(monitor.poll(), StatusCode::PASS_STILL_TESTING);
        assert_eq!(monitor.poll(), StatusCode::PASS_COMPLETE);
    }

    #[test]
    fn test_clock_monitor_detects_skew() {
        let mut monitor = ClockMonitor::new(180_000_000, 20, 32_000, 32, 2, 5);
        monitor.start();
        assert_eq!(monitor.poll(), StatusCode::PASS_STILL_TESTING);
        assert_eq!(monitor.poll(), StatusCode::ERROR);
    }

    #[test]
    fn test_huge_clock_saturates_instead_of_overflowing() {
        let mut monitor = ClockMonitor::new(u64::MAX / 2, 0, 1, 32, 1, 5);
        monitor.start();
        let status = monitor.poll();
        assert!(status == StatusCode::PASS_COMPLETE || status == StatusCode::ERROR);
        assert_eq!(monitor.expected_cycles(), u64::MAX);
    }

    #[test]
    fn test_stalled_timer_never_finishes() {
        let mut monitor = ClockMonitor::new(180_000_000, 0, 32_000, 32, 1, 5);
        monitor.stalled = true;
        monitor.start();
        for _ in 0..100 {
            assert_eq!(monitor.poll(), StatusCode::PASS_STILL_TESTING);
        }
    }
}
