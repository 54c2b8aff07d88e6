/// Inter-processor communication mailbox with a hardware lock.
#[derive(Debug, Default)]
pub struct IpcMailbox {
    locked: bool,
    data: u32,
    /// Lock release is ignored by the hardware.
    pub release_stuck: bool,
}

impl IpcMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&mut self) -> bool {
        if self.locked {
            false
        } else {
            self.locked = true;
            true
        }
    }

    pub fn release(&mut self) {
        if !self.release_stuck {
            self.locked = false;
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn write(&mut self, value: u32) {
        self.data = value;
    }

    pub fn read(&self) -> u32 {
        self.data
    }

    /// Acquire, check contention is refused, pass a word, release.
    pub fn lock_test(&mut self) -> bool {
        if !self.try_acquire() {
            return false;
        }
        let contended = !self.try_acquire();
        self.write(0x1234_5678);
        let data_ok = self.read() == 0x1234_5678;
        self.release();
        contended && data_ok && !self.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_test() {
        assert!(IpcMailbox::new().lock_test());
        let mut stuck = IpcMailbox::new();
        stuck.release_stuck = true;
        assert!(!stuck.lock_test());
    }
}
