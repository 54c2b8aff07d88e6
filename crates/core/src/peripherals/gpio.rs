/// STM32F1-style GPIO port with its outputs looped back onto its inputs.
#[derive(Debug, Default)]
pub struct GpioPort {
    crl: u32,  // 0x00: configuration register low
    crh: u32,  // 0x04: configuration register high
    odr: u32,  // 0x0C: output data register
    lckr: u32, // 0x18: configuration lock register
    /// Pins whose input is shorted to ground.
    stuck_low: u32,
}

impl GpioPort {
    pub const PINS: u32 = 16;

    pub fn new() -> Self {
        Self {
            crl: 0x4444_4444, // Reset value: floating input
            crh: 0x4444_4444, // Reset value: floating input
            ..Default::default()
        }
    }

    pub fn with_stuck_low(pins: u32) -> Self {
        Self {
            stuck_low: pins & 0xFFFF,
            ..Self::new()
        }
    }

    pub fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            0x00 => self.crl,
            0x04 => self.crh,
            0x08 => self.odr & !self.stuck_low, // IDR follows ODR through the loopback
            0x0C => self.odr,
            0x18 => self.lckr,
            _ => 0,
        }
    }

    pub fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            0x00 => self.crl = value,
            0x04 => self.crh = value,
            0x0C => self.odr = value & 0xFFFF,
            0x10 => {
                // BSRR: Bit Set/Reset Register
                let set = value & 0xFFFF;
                let reset = (value >> 16) & 0xFFFF;
                self.odr |= set;
                self.odr &= !reset;
            }
            0x14 => {
                // BRR: Bit Reset Register
                let reset = value & 0xFFFF;
                self.odr &= !reset;
            }
            0x18 => self.lckr = value,
            _ => {}
        }
    }

    /// Drive every pin high then low through BSRR/BRR and read each back.
    /// Configuration and output state are restored afterwards.
    pub fn loopback_test(&mut self) -> bool {
        let saved = (self.crl, self.crh, self.odr);
        // Push-pull output, 50 MHz
        self.write_reg(0x00, 0x3333_3333);
        self.write_reg(0x04, 0x3333_3333);

        let mut ok = true;
        for pin in 0..Self::PINS {
            let mask = 1 << pin;
            self.write_reg(0x10, mask);
            let high = self.read_reg(0x08) & mask != 0;
            self.write_reg(0x14, mask);
            let low = self.read_reg(0x08) & mask == 0;
            if !(high && low) {
                tracing::debug!("GPIO pin {} failed loopback (high={}, low={})", pin, high, low);
                ok = false;
            }
        }

        (self.crl, self.crh, self.odr) = saved;
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bsrr_sets_and_resets() {
        let mut port = GpioPort::new();
        port.write_reg(0x10, 0x0001_0002);
        assert_eq!(port.read_reg(0x0C), 0x2);
        port.write_reg(0x10, 0x0002_0000);
        assert_eq!(port.read_reg(0x0C), 0x0);
    }

    #[test]
    fn test_loopback() {
        assert!(GpioPort::new().loopback_test());
        assert!(!GpioPort::with_stuck_low(1 << 13).loopback_test());
    }
}
