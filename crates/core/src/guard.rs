use crate::InterruptControl;

/// Interrupts-off region around a memory-destructive primitive.
///
/// Entering saves the current global enable and masks interrupts; dropping
/// puts back exactly the saved state, so an early return or an unwinding
/// panic cannot leave interrupts masked (or unmask ones that were already off).
#[derive(Debug)]
pub struct CriticalSection<'a> {
    irq: &'a dyn InterruptControl,
    was_enabled: bool,
}

impl<'a> CriticalSection<'a> {
    pub fn enter(irq: &'a dyn InterruptControl) -> Self {
        let was_enabled = irq.interrupts_enabled();
        irq.set_interrupts_enabled(false);
        tracing::debug!("Interrupts masked (previously enabled: {})", was_enabled);
        Self { irq, was_enabled }
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.irq.set_interrupts_enabled(self.was_enabled);
        tracing::debug!("Interrupt mask restored (enabled: {})", self.was_enabled);
    }
}

/// Run `primitive` exactly once with interrupts masked.
pub fn with_interrupts_masked<R>(irq: &dyn InterruptControl, primitive: impl FnOnce() -> R) -> R {
    let _section = CriticalSection::enter(irq);
    primitive()
}
