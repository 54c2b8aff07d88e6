use serde::{Deserialize, Serialize};

pub mod checksum;
pub mod march;

/// Guard pattern written into the stack bound blocks.
pub const STACK_TEST_PATTERN: u16 = 0x55AA;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_addr: u64,
    pub data: Vec<u8>,
}

/// Flash contents taken from a firmware file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramImage {
    pub entry_point: u64,
    pub segments: Vec<Segment>,
    /// Reference checksum shipped with the image, if the build embedded one.
    pub stored_checksum: Option<u64>,
}

impl ProgramImage {
    pub fn new(entry_point: u64) -> Self {
        Self {
            entry_point,
            segments: Vec::new(),
            stored_checksum: None,
        }
    }

    pub fn add_segment(&mut self, start_addr: u64, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }
}

/// Bits of one byte that always read back a fixed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckCell {
    pub addr: u64,
    pub mask: u8,
    pub value: u8,
}

/// A simple flat memory storage
#[derive(Debug)]
pub struct LinearMemory {
    pub data: Vec<u8>,
    pub base_addr: u64,
    stuck: Vec<StuckCell>,
}

impl LinearMemory {
    pub fn new(size: usize, base_addr: u64) -> Self {
        Self {
            data: vec![0; size],
            base_addr,
            stuck: Vec::new(),
        }
    }

    pub fn end_addr(&self) -> u64 {
        self.base_addr + self.data.len() as u64
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_addr && addr < self.end_addr()
    }

    pub fn add_stuck_cell(&mut self, cell: StuckCell) {
        self.stuck.push(cell);
    }

    pub fn read_u8(&self, addr: u64) -> Option<u8> {
        if !self.contains(addr) {
            return None;
        }
        let raw = self.data[(addr - self.base_addr) as usize];
        Some(
            self.stuck
                .iter()
                .filter(|c| c.addr == addr)
                .fold(raw, |v, c| (v & !c.mask) | (c.value & c.mask)),
        )
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> bool {
        if self.contains(addr) {
            self.data[(addr - self.base_addr) as usize] = value;
            true
        } else {
            false
        }
    }

    pub fn read_u16(&self, addr: u64) -> Option<u16> {
        let lo = self.read_u8(addr)? as u16;
        let hi = self.read_u8(addr + 1)? as u16;
        Some(lo | (hi << 8))
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> bool {
        self.write_u8(addr, (value & 0xFF) as u8) && self.write_u8(addr + 1, (value >> 8) as u8)
    }

    /// Borrow `[addr, addr + len)` if it lies entirely inside this memory.
    pub fn slice(&self, addr: u64, len: usize) -> Option<&[u8]> {
        if addr < self.base_addr || addr + len as u64 > self.end_addr() {
            return None;
        }
        let offset = (addr - self.base_addr) as usize;
        Some(&self.data[offset..offset + len])
    }

    pub fn load_from_segment(&mut self, segment: &Segment) -> bool {
        let end_addr = segment.start_addr + segment.data.len() as u64;

        if segment.start_addr >= self.base_addr && end_addr <= self.end_addr() {
            let offset = (segment.start_addr - self.base_addr) as usize;
            self.data[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
            return true;
        }
        false
    }

    /// Fill `[start, start + len)` with [`STACK_TEST_PATTERN`].
    pub fn fill_pattern(&mut self, start: u64, len: u64) -> bool {
        (0..len / 2).all(|i| self.write_u16(start + i * 2, STACK_TEST_PATTERN))
    }

    pub fn pattern_intact(&self, start: u64, len: u64) -> bool {
        (0..len / 2).all(|i| self.read_u16(start + i * 2) == Some(STACK_TEST_PATTERN))
    }
}
