use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

/// Size of the reserved slot at the end of flash holding the reference checksum.
pub const CHECKSUM_SLOT_SIZE: u64 = 8;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Unknown test '{0}'")]
    UnknownTest(String),
    #[error("Unknown fault '{0}'")]
    UnknownFault(String),
}

/// Every self-test the sequencer knows about, in canonical boot order.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestId {
    StartupRegisters,
    ProgramCounter,
    CpuRegisters,
    ProgramFlow,
    Watchdog,
    Gpio,
    Fpu,
    Dma,
    Ipc,
    Clock,
    Interrupt,
    Sram,
    StackMarch,
    StackBounds,
    Flash,
}

impl TestId {
    pub const ALL: [TestId; 15] = [
        TestId::StartupRegisters,
        TestId::ProgramCounter,
        TestId::CpuRegisters,
        TestId::ProgramFlow,
        TestId::Watchdog,
        TestId::Gpio,
        TestId::Fpu,
        TestId::Dma,
        TestId::Ipc,
        TestId::Clock,
        TestId::Interrupt,
        TestId::Sram,
        TestId::StackMarch,
        TestId::StackBounds,
        TestId::Flash,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TestId::StartupRegisters => "startup_registers",
            TestId::ProgramCounter => "program_counter",
            TestId::CpuRegisters => "cpu_registers",
            TestId::ProgramFlow => "program_flow",
            TestId::Watchdog => "watchdog",
            TestId::Gpio => "gpio",
            TestId::Fpu => "fpu",
            TestId::Dma => "dma",
            TestId::Ipc => "ipc",
            TestId::Clock => "clock",
            TestId::Interrupt => "interrupt",
            TestId::Sram => "sram",
            TestId::StackMarch => "stack_march",
            TestId::StackBounds => "stack_bounds",
            TestId::Flash => "flash",
        }
    }

    /// Name printed in the report table.
    pub fn display_name(self, sram_mode: SramTestMode) -> &'static str {
        match self {
            TestId::StartupRegisters => "Start-Up Register Test",
            TestId::ProgramCounter => "Program Counter Test",
            TestId::CpuRegisters => "CPU Register Test",
            TestId::ProgramFlow => "Program Flow Test",
            TestId::Watchdog => "Watchdog Test",
            TestId::Gpio => "GPIO Test",
            TestId::Fpu => "FPU Register Test",
            TestId::Dma => "DMA DW Test",
            TestId::Ipc => "IPC Test",
            TestId::Clock => "Clock Test",
            TestId::Interrupt => "Interrupt Test",
            TestId::Sram => match sram_mode {
                SramTestMode::March => "SRAM March Test",
                SramTestMode::Galpat => "SRAM GALPAT Test",
            },
            TestId::StackMarch => "Stack March Test",
            TestId::StackBounds => "Stack Memory Test",
            TestId::Flash => "Flash Test",
        }
    }
}

impl FromStr for TestId {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        TestId::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| NameError::UnknownTest(s.to_string()))
    }
}

/// Physical defects the simulated board can be built with.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    StartupRegisters,
    ProgramCounter,
    CpuRegisters,
    ProgramFlow,
    Watchdog,
    Gpio,
    Fpu,
    Dma,
    Ipc,
    ClockSkew,
    ClockStall,
    ClockInit,
    Interrupt,
    Sram,
    StackMarch,
    StackOverflow,
    StackUnderflow,
    Flash,
}

impl Fault {
    pub const ALL: [Fault; 18] = [
        Fault::StartupRegisters,
        Fault::ProgramCounter,
        Fault::CpuRegisters,
        Fault::ProgramFlow,
        Fault::Watchdog,
        Fault::Gpio,
        Fault::Fpu,
        Fault::Dma,
        Fault::Ipc,
        Fault::ClockSkew,
        Fault::ClockStall,
        Fault::ClockInit,
        Fault::Interrupt,
        Fault::Sram,
        Fault::StackMarch,
        Fault::StackOverflow,
        Fault::StackUnderflow,
        Fault::Flash,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Fault::StartupRegisters => "startup_registers",
            Fault::ProgramCounter => "program_counter",
            Fault::CpuRegisters => "cpu_registers",
            Fault::ProgramFlow => "program_flow",
            Fault::Watchdog => "watchdog",
            Fault::Gpio => "gpio",
            Fault::Fpu => "fpu",
            Fault::Dma => "dma",
            Fault::Ipc => "ipc",
            Fault::ClockSkew => "clock_skew",
            Fault::ClockStall => "clock_stall",
            Fault::ClockInit => "clock_init",
            Fault::Interrupt => "interrupt",
            Fault::Sram => "sram",
            Fault::StackMarch => "stack_march",
            Fault::StackOverflow => "stack_overflow",
            Fault::StackUnderflow => "stack_underflow",
            Fault::Flash => "flash",
        }
    }
}

impl FromStr for Fault {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        Fault::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| NameError::UnknownFault(s.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SramTestMode {
    #[default]
    March,
    Galpat,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    #[default]
    Fletcher64,
    Crc32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "64KiB"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct StackConfig {
    /// Full stack size; the stack grows down from the end of SRAM.
    pub size: String,
    /// Bytes at the top of the stack covered by the stack March test.
    pub march_size: String,
    /// Stack pointer used while the March test owns the real stack.
    pub alt_base: u64,
    /// Bytes of guard pattern at each end of the stack.
    pub pattern_block_size: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            size: "4KiB".to_string(),
            march_size: "2KiB".to_string(),
            alt_base: 0x3400_F7FC,
            pattern_block_size: 8,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct SramTestConfig {
    pub mode: SramTestMode,
    pub block_size: String,
    pub buffer_size: String,
}

impl Default for SramTestConfig {
    fn default() -> Self {
        Self {
            mode: SramTestMode::March,
            block_size: "1KiB".to_string(),
            buffer_size: "4KiB".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct FlashConfig {
    pub base: u64,
    pub size: String,
    pub double_words_per_poll: u32,
    pub algorithm: ChecksumAlgorithm,
    /// Overrides the checksum computed when the image is built.
    pub stored_checksum: Option<u64>,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            base: 0x3200_0000,
            size: "32KiB".to_string(),
            double_words_per_poll: 512,
            algorithm: ChecksumAlgorithm::Fletcher64,
            stored_checksum: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct ClockConfig {
    pub cpu_hz: u64,
    /// Independent low-frequency reference the CPU clock is measured against.
    pub reference_hz: u64,
    /// Reference ticks per measurement slot.
    pub slot_ticks: u32,
    pub samples: u32,
    pub tolerance_percent: u32,
    pub skew_percent: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            cpu_hz: 180_000_000,
            reference_hz: 32_000,
            slot_ticks: 32,
            samples: 4,
            tolerance_percent: 5,
            skew_percent: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct Limits {
    /// Upper bound on primitive invocations per polling test. `None` polls forever.
    pub max_polls: Option<u64>,
    pub settle_delay_ms: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_polls: None,
            settle_delay_ms: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BoardManifest {
    pub name: String,
    #[serde(default = "default_sram")]
    pub sram: MemoryRange,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub sram_test: SramTestConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub plan: Option<Vec<TestId>>,
    #[serde(default)]
    pub faults: Vec<Fault>,
}

fn default_sram() -> MemoryRange {
    MemoryRange {
        base: 0x3400_0000,
        size: "64KiB".to_string(),
    }
}

impl Default for BoardManifest {
    fn default() -> Self {
        Self {
            name: "PSoC Control C3".to_string(),
            sram: default_sram(),
            stack: StackConfig::default(),
            sram_test: SramTestConfig::default(),
            flash: FlashConfig::default(),
            clock: ClockConfig::default(),
            limits: Limits::default(),
            plan: None,
            faults: Vec::new(),
        }
    }
}

/// Resolved byte addresses and sizes derived from a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub sram_base: u64,
    pub sram_size: u64,
    /// Initial stack pointer: one past the last SRAM byte.
    pub stack_top: u64,
    pub stack_size: u64,
    pub stack_march_size: u64,
    pub alt_stack_base: u64,
    pub pattern_block_size: u64,
    pub sram_block_size: u64,
    pub sram_buffer_size: u64,
    pub flash_base: u64,
    pub flash_size: u64,
}

impl MemoryLayout {
    /// Lowest address the stack may grow down to.
    pub fn stack_limit(&self) -> u64 {
        self.stack_top - self.stack_size
    }

    /// Bytes of flash covered by the checksum (everything but the reserved slot).
    pub fn flash_checked_size(&self) -> u64 {
        self.flash_size - CHECKSUM_SLOT_SIZE
    }
}

impl BoardManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open board manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse Board Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Tests to run, in order.
    pub fn plan(&self) -> Vec<TestId> {
        self.plan.clone().unwrap_or_else(|| TestId::ALL.to_vec())
    }

    pub fn layout(&self) -> Result<MemoryLayout> {
        let sram_size = parse_size(&self.sram.size).context("sram.size")?;
        let stack_size = parse_size(&self.stack.size).context("stack.size")?;
        let stack_top = self.sram.base.checked_add(sram_size).with_context(|| {
            format!(
                "SRAM at {:#x} with size {:#x} runs past the end of the address space",
                self.sram.base, sram_size
            )
        })?;
        let flash_size = parse_size(&self.flash.size).context("flash.size")?;
        if self.flash.base.checked_add(flash_size).is_none() {
            anyhow::bail!(
                "Flash at {:#x} with size {:#x} runs past the end of the address space",
                self.flash.base,
                flash_size
            );
        }
        Ok(MemoryLayout {
            sram_base: self.sram.base,
            sram_size,
            stack_top,
            stack_size,
            stack_march_size: parse_size(&self.stack.march_size).context("stack.march_size")?,
            alt_stack_base: self.stack.alt_base,
            pattern_block_size: self.stack.pattern_block_size as u64,
            sram_block_size: parse_size(&self.sram_test.block_size)
                .context("sram_test.block_size")?,
            sram_buffer_size: parse_size(&self.sram_test.buffer_size)
                .context("sram_test.buffer_size")?,
            flash_base: self.flash.base,
            flash_size,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Board 'name' cannot be empty");
        }

        let layout = self.layout()?;

        if layout.sram_size == 0 {
            anyhow::bail!("SRAM size must be greater than zero");
        }
        if layout.sram_block_size == 0 || layout.sram_block_size > layout.sram_size {
            anyhow::bail!(
                "sram_test.block_size must be between 1 byte and the SRAM size ({} bytes)",
                layout.sram_size
            );
        }
        if layout.sram_buffer_size < layout.sram_block_size {
            anyhow::bail!("sram_test.buffer_size must be able to hold one block_size of data");
        }
        if layout.stack_size == 0 || layout.stack_size > layout.sram_size {
            anyhow::bail!("Stack size must fit inside SRAM");
        }
        if layout.pattern_block_size == 0 || layout.pattern_block_size % 2 != 0 {
            anyhow::bail!("stack.pattern_block_size must be a non-zero multiple of 2");
        }
        if layout.pattern_block_size * 2 > layout.stack_size {
            anyhow::bail!("Stack is too small for two pattern blocks");
        }
        if layout.stack_march_size == 0 || layout.stack_march_size > layout.stack_size {
            anyhow::bail!("stack.march_size must be between 1 byte and the stack size");
        }
        if layout.stack_march_size > layout.sram_buffer_size {
            anyhow::bail!("sram_test.buffer_size must be able to hold stack.march_size of data");
        }
        let march_floor = layout.stack_top - layout.stack_march_size;
        if layout.alt_stack_base < layout.stack_limit() || layout.alt_stack_base >= march_floor {
            anyhow::bail!(
                "stack.alt_base {:#x} must lie inside the stack and below the March range ({:#x})",
                layout.alt_stack_base,
                march_floor
            );
        }

        if layout.flash_size <= CHECKSUM_SLOT_SIZE || layout.flash_size % 8 != 0 {
            anyhow::bail!("flash.size must be a multiple of 8 bytes larger than the checksum slot");
        }
        if self.flash.double_words_per_poll == 0 {
            anyhow::bail!("flash.double_words_per_poll must be greater than zero");
        }

        let clock = &self.clock;
        if clock.reference_hz == 0 || clock.cpu_hz < clock.reference_hz {
            anyhow::bail!("clock.cpu_hz must be at least clock.reference_hz (> 0)");
        }
        if clock.slot_ticks == 0 || clock.samples == 0 {
            anyhow::bail!("clock.slot_ticks and clock.samples must be greater than zero");
        }
        if clock.tolerance_percent >= 100 || clock.skew_percent <= -100 || clock.skew_percent > 100
        {
            anyhow::bail!(
                "clock.tolerance_percent must be < 100 and clock.skew_percent within -99..=100"
            );
        }
        // Skew, including an injected clock fault, stays below three times cpu_hz.
        if clock
            .cpu_hz
            .checked_mul(3)
            .and_then(|hz| hz.checked_mul(clock.slot_ticks as u64))
            .is_none()
        {
            anyhow::bail!(
                "clock.cpu_hz ({}) times clock.slot_ticks ({}) is too large to count",
                clock.cpu_hz,
                clock.slot_ticks
            );
        }

        if self.limits.max_polls == Some(0) {
            anyhow::bail!("Limit 'max_polls' must be greater than zero when set");
        }

        if let Some(plan) = &self.plan {
            if plan.is_empty() {
                anyhow::bail!("Test 'plan' cannot be empty when set");
            }
            let mut seen = HashSet::new();
            for test in plan {
                if !seen.insert(*test) {
                    anyhow::bail!("Test '{}' appears more than once in the plan", test.as_str());
                }
            }
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_manifest_uses_defaults() {
        let yaml = r#"
name: "sim-board"
"#;
        let manifest: BoardManifest = serde_yaml::from_str(yaml).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.plan(), TestId::ALL.to_vec());
        assert_eq!(manifest.limits.max_polls, None);
        assert_eq!(manifest.limits.settle_delay_ms, 500);

        let layout = manifest.layout().unwrap();
        assert_eq!(layout.sram_size, 0x1_0000);
        assert_eq!(layout.stack_top, 0x3401_0000);
        assert_eq!(layout.stack_limit(), 0x3400_F000);
        assert_eq!(layout.flash_checked_size(), 32 * 1024 - 8);
    }

    #[test]
    fn test_full_manifest() {
        let yaml = r#"
name: "psoc-c3"
sram:
  base: 0x20000000
  size: "32KiB"
stack:
  size: "2KiB"
  march_size: "1KiB"
  alt_base: 0x20007900
  pattern_block_size: 8
sram_test:
  mode: galpat
  block_size: "256B"
  buffer_size: "1KiB"
flash:
  base: 0x10000000
  size: "16KiB"
  double_words_per_poll: 128
  algorithm: crc32
  stored_checksum: 0x1234
clock:
  samples: 3
  skew_percent: 2
limits:
  max_polls: 100
  settle_delay_ms: 0
plan: [cpu_registers, clock, sram]
faults: [sram, clock_skew]
"#;
        let manifest: BoardManifest = serde_yaml::from_str(yaml).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.sram_test.mode, SramTestMode::Galpat);
        assert_eq!(manifest.flash.algorithm, ChecksumAlgorithm::Crc32);
        assert_eq!(manifest.flash.stored_checksum, Some(0x1234));
        assert_eq!(
            manifest.plan(),
            vec![TestId::CpuRegisters, TestId::Clock, TestId::Sram]
        );
        assert_eq!(manifest.faults, vec![Fault::Sram, Fault::ClockSkew]);
        assert_eq!(manifest.layout().unwrap().sram_block_size, 256);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
name: "sim-board"
flash:
  checksum_mode: crc32
"#;
        assert!(serde_yaml::from_str::<BoardManifest>(yaml).is_err());
    }

    #[test]
    fn test_empty_name() {
        let manifest = BoardManifest {
            name: "  ".to_string(),
            ..Default::default()
        };
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_zero_max_polls() {
        let mut manifest = BoardManifest::default();
        manifest.limits.max_polls = Some(0);
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("max_polls"));
    }

    #[test]
    fn test_duplicate_plan_entry() {
        let manifest = BoardManifest {
            plan: Some(vec![TestId::Clock, TestId::Gpio, TestId::Clock]),
            ..Default::default()
        };
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_alt_stack_inside_march_range() {
        let mut manifest = BoardManifest::default();
        manifest.stack.alt_base = 0x3400_FF00;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("alt_base"));
    }

    #[test]
    fn test_restore_buffer_too_small() {
        let mut manifest = BoardManifest::default();
        manifest.sram_test.buffer_size = "512B".to_string();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("buffer_size"));
    }

    #[test]
    fn test_sram_past_address_space() {
        let mut manifest = BoardManifest::default();
        manifest.sram.base = 0xFFFF_FFFF_FFFF_F000;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("SRAM"));
    }

    #[test]
    fn test_flash_past_address_space() {
        let mut manifest = BoardManifest::default();
        manifest.flash.base = u64::MAX - 16;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("Flash"));
    }

    #[test]
    fn test_cpu_clock_too_fast_to_count() {
        let mut manifest = BoardManifest::default();
        manifest.clock.cpu_hz = u64::MAX / 2;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("cpu_hz"));

        manifest.clock.cpu_hz = 180_000_000;
        manifest.clock.skew_percent = 500;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("skew_percent"));
    }

    #[test]
    fn test_names_parse_in_both_spellings() {
        assert_eq!("stack-march".parse::<TestId>(), Ok(TestId::StackMarch));
        assert_eq!("stack_overflow".parse::<Fault>(), Ok(Fault::StackOverflow));
        assert_eq!(
            "bogus".parse::<Fault>(),
            Err(NameError::UnknownFault("bogus".to_string()))
        );
    }

    #[test]
    fn test_display_name_follows_sram_mode() {
        assert_eq!(
            TestId::Sram.display_name(SramTestMode::March),
            "SRAM March Test"
        );
        assert_eq!(
            TestId::Sram.display_name(SramTestMode::Galpat),
            "SRAM GALPAT Test"
        );
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("64KiB").unwrap(), 65536);
        assert_eq!(parse_size("256B").unwrap(), 256);
        assert!(parse_size("lots").is_err());
    }
}
