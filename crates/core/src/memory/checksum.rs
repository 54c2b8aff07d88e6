//! Incremental flash checksums. Both accept data in arbitrary chunks as long
//! as every chunk but the last is a multiple of 4 bytes.

use bootcheck_config::ChecksumAlgorithm;

const FLETCHER_MOD: u64 = 0xFFFF_FFFF;

/// Fletcher-64 over little-endian 32-bit words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fletcher64 {
    lo: u64,
    hi: u64,
}

impl Fletcher64 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.lo = (self.lo + u32::from_le_bytes(word) as u64) % FLETCHER_MOD;
            self.hi = (self.hi + self.lo) % FLETCHER_MOD;
        }
    }

    pub fn value(&self) -> u64 {
        (self.hi << 32) | self.lo
    }
}

#[derive(Debug, Clone)]
pub enum FlashChecksum {
    Fletcher64(Fletcher64),
    Crc32(crc32fast::Hasher),
}

impl FlashChecksum {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Fletcher64 => FlashChecksum::Fletcher64(Fletcher64::new()),
            ChecksumAlgorithm::Crc32 => FlashChecksum::Crc32(crc32fast::Hasher::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            FlashChecksum::Fletcher64(f) => f.update(bytes),
            FlashChecksum::Crc32(h) => h.update(bytes),
        }
    }

    pub fn finalize(self) -> u64 {
        match self {
            FlashChecksum::Fletcher64(f) => f.value(),
            FlashChecksum::Crc32(h) => h.finalize() as u64,
        }
    }
}

/// One-shot checksum, as computed when the image is built.
pub fn compute(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> u64 {
    let mut sum = FlashChecksum::new(algorithm);
    sum.update(bytes);
    sum.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fletcher_known_words() {
        let mut f = Fletcher64::new();
        f.update(&[1, 0, 0, 0, 2, 0, 0, 0]);
        // lo = 1 + 2, hi = 1 + 3
        assert_eq!(f.value(), (4 << 32) | 3);
    }

    #[test]
    fn test_chunked_matches_one_shot() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 + 7) as u8).collect();
        for algorithm in [ChecksumAlgorithm::Fletcher64, ChecksumAlgorithm::Crc32] {
            let mut sum = FlashChecksum::new(algorithm);
            for chunk in data.chunks(512) {
                sum.update(chunk);
            }
            assert_eq!(sum.finalize(), compute(algorithm, &data));
        }
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(compute(ChecksumAlgorithm::Crc32, b"123456789"), 0xCBF4_3926);
    }
}
