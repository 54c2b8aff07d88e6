use crate::InterruptControl;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Shared state for NVIC registers plus the core's global interrupt gate.
#[derive(Debug)]
pub struct NvicState {
    pub iser: [AtomicU32; 8],
    pub ispr: [AtomicU32; 8],
    /// Cleared PRIMASK: interrupts may be taken.
    pub global_enable: AtomicBool,
}

impl Default for NvicState {
    fn default() -> Self {
        Self {
            iser: Default::default(),
            ispr: Default::default(),
            global_enable: AtomicBool::new(true),
        }
    }
}

impl InterruptControl for NvicState {
    fn interrupts_enabled(&self) -> bool {
        self.global_enable.load(Ordering::SeqCst)
    }

    fn set_interrupts_enabled(&self, enabled: bool) {
        self.global_enable.store(enabled, Ordering::SeqCst);
    }
}

fn slot(irq: u32) -> Option<(usize, u32)> {
    if irq < 16 {
        return None;
    }
    let idx = ((irq - 16) / 32) as usize;
    let bit = (irq - 16) % 32;
    (idx < 8).then_some((idx, bit))
}

/// Nested Vectored Interrupt Controller (NVIC) mock.
#[derive(Debug, Clone)]
pub struct Nvic {
    pub state: std::sync::Arc<NvicState>,
}

impl Nvic {
    pub fn new(state: std::sync::Arc<NvicState>) -> Self {
        Self { state }
    }

    pub fn is_enabled(&self, irq: u32) -> bool {
        if irq < 16 {
            return true;
        }
        match slot(irq) {
            Some((idx, bit)) => (self.state.iser[idx].load(Ordering::SeqCst) & (1 << bit)) != 0,
            None => false,
        }
    }

    pub fn enable_irq(&self, irq: u32) {
        if let Some((idx, bit)) = slot(irq) {
            self.state.iser[idx].fetch_or(1 << bit, Ordering::SeqCst);
            tracing::debug!("NVIC: IRQ {} enabled", irq);
        }
    }

    pub fn disable_irq(&self, irq: u32) {
        if let Some((idx, bit)) = slot(irq) {
            self.state.iser[idx].fetch_and(!(1 << bit), Ordering::SeqCst);
        }
    }

    pub fn set_pending(&self, irq: u32) {
        if let Some((idx, bit)) = slot(irq) {
            self.state.ispr[idx].fetch_or(1 << bit, Ordering::SeqCst);
        }
    }

    pub fn is_pending(&self, irq: u32) -> bool {
        match slot(irq) {
            Some((idx, bit)) => (self.state.ispr[idx].load(Ordering::SeqCst) & (1 << bit)) != 0,
            None => false,
        }
    }

    /// Take `irq` if it is pending, enabled and the global gate is open.
    /// Clears the pending bit on delivery.
    pub fn try_deliver(&self, irq: u32) -> bool {
        if !self.state.interrupts_enabled() || !self.is_enabled(irq) || !self.is_pending(irq) {
            return false;
        }
        if let Some((idx, bit)) = slot(irq) {
            self.state.ispr[idx].fetch_and(!(1 << bit), Ordering::SeqCst);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_delivery_needs_global_gate() {
        let state = Arc::new(NvicState::default());
        let nvic = Nvic::new(state.clone());
        nvic.enable_irq(21);
        nvic.set_pending(21);

        state.set_interrupts_enabled(false);
        assert!(!nvic.try_deliver(21));
        assert!(nvic.is_pending(21));

        state.set_interrupts_enabled(true);
        assert!(nvic.try_deliver(21));
        assert!(!nvic.is_pending(21));
    }

    #[test]
    fn test_disabled_line_not_delivered() {
        let nvic = Nvic::new(Arc::new(NvicState::default()));
        nvic.set_pending(40);
        assert!(!nvic.try_deliver(40));
        nvic.enable_irq(40);
        assert!(nvic.try_deliver(40));
        nvic.disable_irq(40);
        assert!(!nvic.is_enabled(40));
    }
}
