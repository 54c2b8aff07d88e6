//! Memory test algorithms run by the simulated SRAM primitives.
//!
//! All of them destroy the contents of the range under test;
//! [`run_preserving`] wraps them with a save/restore through a buffer.

use super::LinearMemory;

const ZERO: u8 = 0x00;
const ONE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Up,
    Down,
}

fn addresses(start: u64, len: u64, order: Order) -> Box<dyn Iterator<Item = u64>> {
    match order {
        Order::Up => Box::new(start..start + len),
        Order::Down => Box::new((start..start + len).rev()),
    }
}

/// One March element: for every address in `order`, optionally read and
/// compare against `expect`, then optionally write `write`.
fn element(
    mem: &mut LinearMemory,
    start: u64,
    len: u64,
    order: Order,
    expect: Option<u8>,
    write: Option<u8>,
) -> bool {
    for addr in addresses(start, len, order) {
        if let Some(expected) = expect {
            if mem.read_u8(addr) != Some(expected) {
                tracing::debug!("March mismatch at {:#x}, expected {:#04x}", addr, expected);
                return false;
            }
        }
        if let Some(value) = write {
            if !mem.write_u8(addr, value) {
                return false;
            }
        }
    }
    true
}

/// March C-: {⇕(w0); ⇑(r0,w1); ⇑(r1,w0); ⇓(r0,w1); ⇓(r1,w0); ⇕(r0)}
pub fn march_c_minus(mem: &mut LinearMemory, start: u64, len: u64) -> bool {
    element(mem, start, len, Order::Up, None, Some(ZERO))
        && element(mem, start, len, Order::Up, Some(ZERO), Some(ONE))
        && element(mem, start, len, Order::Up, Some(ONE), Some(ZERO))
        && element(mem, start, len, Order::Down, Some(ZERO), Some(ONE))
        && element(mem, start, len, Order::Down, Some(ONE), Some(ZERO))
        && element(mem, start, len, Order::Up, Some(ZERO), None)
}

/// Galloping pattern: each cell in turn is set against a zero background
/// and every other cell is checked for disturbance.
pub fn galpat(mem: &mut LinearMemory, start: u64, len: u64) -> bool {
    if !element(mem, start, len, Order::Up, None, Some(ZERO)) {
        return false;
    }
    for base in start..start + len {
        mem.write_u8(base, ONE);
        for other in start..start + len {
            let expected = if other == base { ONE } else { ZERO };
            if mem.read_u8(other) != Some(expected) {
                tracing::debug!("GALPAT mismatch at {:#x} (base {:#x})", other, base);
                return false;
            }
        }
        mem.write_u8(base, ZERO);
    }
    true
}

/// Copy the range into `restore`, run `algorithm`, copy it back.
///
/// Returns `false` without touching memory when the buffer is too small or
/// the range falls outside `mem`.
pub fn run_preserving(
    mem: &mut LinearMemory,
    start: u64,
    len: u64,
    restore: &mut [u8],
    algorithm: fn(&mut LinearMemory, u64, u64) -> bool,
) -> bool {
    let len_bytes = len as usize;
    if restore.len() < len_bytes {
        return false;
    }
    match mem.slice(start, len_bytes) {
        Some(contents) => restore[..len_bytes].copy_from_slice(contents),
        None => return false,
    }

    let ok = algorithm(mem, start, len);

    let offset = (start - mem.base_addr) as usize;
    mem.data[offset..offset + len_bytes].copy_from_slice(&restore[..len_bytes]);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StuckCell;

    fn seeded(size: usize) -> LinearMemory {
        let mut mem = LinearMemory::new(size, 0x3400_0000);
        for (i, b) in mem.data.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(7);
        }
        mem
    }

    #[test]
    fn test_march_passes_and_restores() {
        let mut mem = seeded(256);
        let before = mem.data.clone();
        let mut buffer = vec![0u8; 128];
        assert!(run_preserving(&mut mem, 0x3400_0040, 128, &mut buffer, march_c_minus));
        assert_eq!(mem.data, before);
    }

    #[test]
    fn test_march_detects_stuck_bit() {
        let mut mem = seeded(64);
        mem.add_stuck_cell(StuckCell {
            addr: 0x3400_0010,
            mask: 0x80,
            value: 0x80,
        });
        assert!(!march_c_minus(&mut mem, 0x3400_0000, 64));
    }

    #[test]
    fn test_galpat_detects_stuck_bit_and_restores() {
        let mut mem = seeded(32);
        mem.add_stuck_cell(StuckCell {
            addr: 0x3400_0005,
            mask: 0x04,
            value: 0x00,
        });
        let before = mem.data.clone();
        let mut buffer = vec![0u8; 32];
        assert!(!run_preserving(&mut mem, 0x3400_0000, 32, &mut buffer, galpat));
        assert_eq!(mem.data, before);
    }

    #[test]
    fn test_small_restore_buffer_refused() {
        let mut mem = seeded(64);
        let mut buffer = vec![0u8; 16];
        assert!(!run_preserving(&mut mem, 0x3400_0000, 64, &mut buffer, galpat));
    }
}
