//! Simulated target board.
//!
//! Every diagnostic primitive runs against a small software model of the
//! hardware block it exercises. Faults from the manifest are injected into
//! those models when the board is built, so a run shows exactly which rows
//! the injected defects turn into `ERROR`.

use crate::cpu::flow::{ProgramCounterCheck, ProgramFlowCheck};
use crate::cpu::{CortexM, Fpu, StuckBit};
use crate::memory::checksum::{self, FlashChecksum};
use crate::memory::march::{galpat, march_c_minus, run_preserving};
use crate::memory::{LinearMemory, ProgramImage, StuckCell};
use crate::peripherals::dma::DmaChannel;
use crate::peripherals::gpio::GpioPort;
use crate::peripherals::ipc::IpcMailbox;
use crate::peripherals::nvic::{Nvic, NvicState};
use crate::peripherals::scb::{Scb, StartupRegisters};
use crate::peripherals::systick::{ClockMonitor, Systick};
use crate::peripherals::wdt::Watchdog;
use crate::{
    Board, Diagnostic, EngineError, EngineResult, Fault, InterruptControl, SramTestMode,
    StackFault, StatusCode, TestId,
};
use anyhow::{Context, Result};
use bootcheck_config::{BoardManifest, ChecksumAlgorithm, MemoryLayout, CHECKSUM_SLOT_SIZE};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Timer interrupt line used by the interrupt test.
pub const INTERRUPT_TEST_IRQ: u32 = 21;
const INTERRUPT_PERIOD_TICKS: u32 = 8;
const INTERRUPT_WINDOW_TICKS: u32 = 64;

const WATCHDOG_MATCH: u32 = 256;
/// Match value armed while the clock test polls; long enough to never bite.
const CLOCK_WATCHDOG_MATCH: u32 = 0xFFFF;
const DMA_BUFFER_SIZE: usize = 64;
const GPIO_STUCK_PIN: u32 = 13;

/// Flash checksum scan in progress.
#[derive(Debug)]
struct FlashScan {
    offset: u64,
    sum: FlashChecksum,
}

#[derive(Debug)]
pub struct SimBoard {
    layout: MemoryLayout,

    nvic_state: Arc<NvicState>,
    nvic: Nvic,
    irq_timer: Systick,
    irq_line_dead: bool,

    cpu: CortexM,
    fpu: Fpu,
    pc_check: ProgramCounterCheck,
    flow_check: ProgramFlowCheck,
    scb: Scb,
    startup: StartupRegisters,

    wdt: Watchdog,
    gpio: GpioPort,
    dma: DmaChannel,
    ipc: IpcMailbox,

    clock: ClockMonitor,
    clock_init_fails: bool,

    sram: LinearMemory,
    sram_mode: SramTestMode,
    restore_buffer: Vec<u8>,
    stack_excursion: StackFault,

    flash: LinearMemory,
    algorithm: ChecksumAlgorithm,
    bytes_per_poll: u64,
    stored_checksum: u64,
    flash_scan: Option<FlashScan>,
    last_checksum: Option<u64>,

    settled_ms: u64,
}

impl SimBoard {
    pub fn new(manifest: &BoardManifest) -> Result<Self> {
        Self::with_image(manifest, None)
    }

    /// Build the board, loading `image` into flash when given.
    ///
    /// The manifest is validated first, so a hand-built one cannot produce an
    /// impossible memory layout.
    pub fn with_image(manifest: &BoardManifest, image: Option<&ProgramImage>) -> Result<Self> {
        manifest.validate().context("Invalid board manifest")?;
        let layout = manifest.layout().context("Failed to resolve memory layout")?;
        let faults = &manifest.faults;
        let has = |fault: Fault| faults.contains(&fault);

        let nvic_state = Arc::new(NvicState::default());
        let nvic = Nvic::new(nvic_state.clone());

        let cpu = if has(Fault::CpuRegisters) {
            CortexM::with_stuck_bit(StuckBit {
                register: 7,
                bit: 3,
                value: false,
            })
        } else {
            CortexM::new()
        };
        let fpu = if has(Fault::Fpu) {
            Fpu::with_stuck_bit(StuckBit {
                register: 5,
                bit: 30,
                value: true,
            })
        } else {
            Fpu::new()
        };
        let pc_check = if has(Fault::ProgramCounter) {
            ProgramCounterCheck::misrouted()
        } else {
            ProgramCounterCheck::new()
        };
        let flow_check = ProgramFlowCheck {
            skipped_checkpoint: has(Fault::ProgramFlow).then_some(3),
        };

        let mut scb = Scb::boot_defaults(layout.flash_base as u32);
        let mut startup = StartupRegisters::new();
        startup.save(&scb);
        if has(Fault::StartupRegisters) {
            scb.vtor ^= 0x400;
        }

        let mut wdt = Watchdog::new();
        wdt.broken = has(Fault::Watchdog);

        let gpio = if has(Fault::Gpio) {
            GpioPort::with_stuck_low(1 << GPIO_STUCK_PIN)
        } else {
            GpioPort::new()
        };
        let mut dma = DmaChannel::new(DMA_BUFFER_SIZE);
        dma.drops_last_beat = has(Fault::Dma);
        let mut ipc = IpcMailbox::new();
        ipc.release_stuck = has(Fault::Ipc);

        let clock_cfg = &manifest.clock;
        let skew = if has(Fault::ClockSkew) {
            clock_cfg.tolerance_percent as i32 + 10
        } else {
            clock_cfg.skew_percent
        };
        let mut clock = ClockMonitor::new(
            clock_cfg.cpu_hz,
            skew,
            clock_cfg.reference_hz,
            clock_cfg.slot_ticks,
            clock_cfg.samples,
            clock_cfg.tolerance_percent,
        );
        clock.stalled = has(Fault::ClockStall);

        let mut sram = LinearMemory::new(layout.sram_size as usize, layout.sram_base);
        fill_live_data(&mut sram.data);
        if has(Fault::Sram) {
            sram.add_stuck_cell(StuckCell {
                addr: layout.sram_base + layout.sram_block_size / 2,
                mask: 0x10,
                value: 0x00,
            });
        }
        if has(Fault::StackMarch) {
            sram.add_stuck_cell(StuckCell {
                addr: layout.stack_top - layout.stack_march_size / 2,
                mask: 0x01,
                value: 0x01,
            });
        }
        let mut stack_excursion = StackFault::empty();
        stack_excursion.set(StackFault::OVERFLOW, has(Fault::StackOverflow));
        stack_excursion.set(StackFault::UNDERFLOW, has(Fault::StackUnderflow));

        let mut flash = LinearMemory::new(layout.flash_size as usize, layout.flash_base);
        fill_live_data(&mut flash.data);
        if let Some(image) = image {
            for segment in &image.segments {
                if !flash.load_from_segment(segment) {
                    warn!(
                        "Segment at {:#x} ({} bytes) does not fit in flash, skipped",
                        segment.start_addr,
                        segment.data.len()
                    );
                }
            }
        }

        let algorithm = manifest.flash.algorithm;
        let checked = layout.flash_checked_size() as usize;
        let stored_checksum = match image
            .and_then(|i| i.stored_checksum)
            .or(manifest.flash.stored_checksum)
        {
            Some(value) => value,
            None => checksum::compute(algorithm, &flash.data[..checked]),
        };
        flash.data[checked..checked + CHECKSUM_SLOT_SIZE as usize]
            .copy_from_slice(&stored_checksum.to_le_bytes());
        if has(Fault::Flash) {
            flash.data[checked / 2] ^= 0x5A;
        }

        info!(
            "Board '{}' ready: SRAM {:#x}+{:#x}, flash {:#x}+{:#x}, {} fault(s) injected",
            manifest.name,
            layout.sram_base,
            layout.sram_size,
            layout.flash_base,
            layout.flash_size,
            faults.len()
        );

        Ok(Self {
            nvic_state,
            nvic,
            irq_timer: Systick::new(),
            irq_line_dead: has(Fault::Interrupt),
            cpu,
            fpu,
            pc_check,
            flow_check,
            scb,
            startup,
            wdt,
            gpio,
            dma,
            ipc,
            clock,
            clock_init_fails: has(Fault::ClockInit),
            restore_buffer: vec![0; layout.sram_buffer_size as usize],
            sram,
            sram_mode: manifest.sram_test.mode,
            stack_excursion,
            flash,
            algorithm,
            bytes_per_poll: manifest.flash.double_words_per_poll as u64 * 8,
            stored_checksum,
            flash_scan: None,
            last_checksum: None,
            settled_ms: 0,
            layout,
        })
    }

    pub fn nvic_state(&self) -> &Arc<NvicState> {
        &self.nvic_state
    }

    pub fn sram(&self) -> &LinearMemory {
        &self.sram
    }

    /// Total time spent in settle delays.
    pub fn settled_ms(&self) -> u64 {
        self.settled_ms
    }

    fn interrupt_test(&mut self) -> bool {
        let mut delivered = 0;
        for _ in 0..INTERRUPT_WINDOW_TICKS {
            if self.irq_timer.tick() && !self.irq_line_dead {
                self.nvic.set_pending(INTERRUPT_TEST_IRQ);
            }
            if self.nvic.try_deliver(INTERRUPT_TEST_IRQ) {
                delivered += 1;
            }
        }
        let expected = INTERRUPT_WINDOW_TICKS / INTERRUPT_PERIOD_TICKS;
        debug!("Interrupt test: {} of {} ISRs taken", delivered, expected);
        delivered == expected
    }

    /// Destructive tests must only ever run with interrupts masked.
    fn destructive_allowed(&self, test: TestId) -> bool {
        if self.nvic_state.interrupts_enabled() {
            warn!("{:?} invoked with interrupts enabled, refusing to touch memory", test);
            false
        } else {
            true
        }
    }

    fn sram_test(&mut self) -> bool {
        let algorithm = match self.sram_mode {
            SramTestMode::March => march_c_minus,
            SramTestMode::Galpat => galpat,
        };
        run_preserving(
            &mut self.sram,
            self.layout.sram_base,
            self.layout.sram_block_size,
            &mut self.restore_buffer,
            algorithm,
        )
    }

    fn stack_march_test(&mut self) -> bool {
        let len = self.layout.stack_march_size;
        let start = self.layout.stack_top - len;
        debug!(
            "Stack pointer moved to {:#x} while March runs over {:#x}..{:#x}",
            self.layout.alt_stack_base, start, self.layout.stack_top
        );
        run_preserving(
            &mut self.sram,
            start,
            len,
            &mut self.restore_buffer,
            march_c_minus,
        )
    }

    fn flash_poll(&mut self) -> StatusCode {
        let checked = self.layout.flash_checked_size();
        let base = self.layout.flash_base;
        let Some(scan) = self.flash_scan.as_mut() else {
            return StatusCode::ERROR;
        };

        let len = self.bytes_per_poll.min(checked - scan.offset);
        match self.flash.slice(base + scan.offset, len as usize) {
            Some(bytes) => scan.sum.update(bytes),
            None => return StatusCode::ERROR,
        }
        scan.offset += len;
        if scan.offset < checked {
            return StatusCode::PASS_STILL_TESTING;
        }

        let Some(done) = self.flash_scan.take() else {
            return StatusCode::ERROR;
        };
        let value = done.sum.finalize();
        self.last_checksum = Some(value);
        if value == self.stored_checksum {
            StatusCode::PASS_COMPLETE
        } else {
            debug!(
                "Flash checksum {:#x} does not match stored {:#x}",
                value, self.stored_checksum
            );
            StatusCode::ERROR
        }
    }

    fn overflow_block(&self) -> u64 {
        self.layout.stack_limit()
    }

    fn underflow_block(&self) -> u64 {
        self.layout.stack_top - self.layout.pattern_block_size
    }
}

/// Deterministic contents standing in for whatever the application left behind.
fn fill_live_data(data: &mut [u8]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b = ((i * 31 + 7) % 251) as u8;
    }
}

impl Board for SimBoard {
    fn interrupt_control(&self) -> Arc<dyn InterruptControl> {
        self.nvic_state.clone()
    }

    fn prepare(&mut self, test: TestId) -> EngineResult<()> {
        match test {
            TestId::Clock => {
                if self.clock_init_fails {
                    return Err(EngineError::Init {
                        test,
                        reason: "reference timer did not start".to_string(),
                    });
                }
                self.wdt.unlock();
                self.wdt.enable(CLOCK_WATCHDOG_MATCH);
                self.wdt.lock();
                self.clock.start();
            }
            TestId::Interrupt => {
                self.nvic.enable_irq(INTERRUPT_TEST_IRQ);
                self.irq_timer.start_periodic(INTERRUPT_PERIOD_TICKS);
            }
            TestId::Flash => {
                self.last_checksum = None;
                self.flash_scan = Some(FlashScan {
                    offset: 0,
                    sum: FlashChecksum::new(self.algorithm),
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn run(&mut self, test: TestId) -> StatusCode {
        let ok = match test {
            TestId::StartupRegisters => self.startup.verify(&self.scb),
            TestId::ProgramCounter => self.pc_check.run(),
            TestId::CpuRegisters => self.cpu.register_test(),
            TestId::ProgramFlow => self.flow_check.run(),
            TestId::Watchdog => self.wdt.expiry_test(WATCHDOG_MATCH),
            TestId::Gpio => self.gpio.loopback_test(),
            TestId::Fpu => self.fpu.register_test(),
            TestId::Dma => self.dma.self_test(),
            TestId::Ipc => self.ipc.lock_test(),
            TestId::Clock => return self.clock.poll(),
            TestId::Interrupt => self.interrupt_test(),
            TestId::Sram => self.destructive_allowed(test) && self.sram_test(),
            TestId::StackMarch => self.destructive_allowed(test) && self.stack_march_test(),
            TestId::Flash => return self.flash_poll(),
            TestId::StackBounds => {
                self.seed_stack();
                self.check_stack().is_empty()
            }
        };
        StatusCode::from_ok(ok)
    }

    fn finish(&mut self, test: TestId) {
        match test {
            TestId::Clock => {
                self.clock.stop();
                self.wdt.clear_interrupt();
                self.wdt.unlock();
                self.wdt.disable();
            }
            TestId::Interrupt => {
                self.irq_timer.stop();
                self.nvic.disable_irq(INTERRUPT_TEST_IRQ);
            }
            TestId::Flash => self.flash_scan = None,
            _ => {}
        }
    }

    fn seed_stack(&mut self) {
        let block = self.layout.pattern_block_size;
        let overflow = self.overflow_block();
        let underflow = self.underflow_block();
        self.sram.fill_pattern(overflow, block);
        self.sram.fill_pattern(underflow, block);
    }

    fn check_stack(&mut self) -> StackFault {
        let block = self.layout.pattern_block_size;
        let overflow = self.overflow_block();
        let underflow = self.underflow_block();

        if self.stack_excursion.contains(StackFault::OVERFLOW) {
            self.sram.write_u16(overflow, 0xDEAD);
        }
        if self.stack_excursion.contains(StackFault::UNDERFLOW) {
            self.sram.write_u16(underflow + block - 2, 0xBEEF);
        }

        let mut fault = StackFault::empty();
        fault.set(StackFault::OVERFLOW, !self.sram.pattern_intact(overflow, block));
        fault.set(StackFault::UNDERFLOW, !self.sram.pattern_intact(underflow, block));
        fault
    }

    fn diagnostic(&self, test: TestId) -> Option<Diagnostic> {
        match test {
            TestId::Flash => self.last_checksum.map(|value| Diagnostic::FlashChecksum {
                algorithm: self.algorithm,
                value,
            }),
            _ => None,
        }
    }

    fn delay_ms(&mut self, ms: u32) {
        debug!("Settling for {} ms", ms);
        self.settled_ms += ms as u64;
    }
}
