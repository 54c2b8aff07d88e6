/// Transfer description for one DataWire channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub src_offset: usize,
    pub dst_offset: usize,
    pub len: usize,
}

/// Single DMA channel moving bytes between two local buffers.
#[derive(Debug)]
pub struct DmaChannel {
    pub src: Vec<u8>,
    pub dst: Vec<u8>,
    /// The final beat of each transfer never lands.
    pub drops_last_beat: bool,
}

impl DmaChannel {
    pub fn new(size: usize) -> Self {
        Self {
            src: vec![0; size],
            dst: vec![0; size],
            drops_last_beat: false,
        }
    }

    pub fn transfer(&mut self, desc: Descriptor) -> bool {
        if desc.src_offset + desc.len > self.src.len()
            || desc.dst_offset + desc.len > self.dst.len()
        {
            return false;
        }
        let len = if self.drops_last_beat {
            desc.len.saturating_sub(1)
        } else {
            desc.len
        };
        self.dst[desc.dst_offset..desc.dst_offset + len]
            .copy_from_slice(&self.src[desc.src_offset..desc.src_offset + len]);
        true
    }

    /// Chain two descriptors over a known pattern and compare the result.
    pub fn self_test(&mut self) -> bool {
        let half = self.src.len() / 2;
        for (i, b) in self.src.iter_mut().enumerate() {
            *b = (i as u8) ^ 0xA5;
        }
        self.dst.fill(0);
        let descriptors = [
            Descriptor {
                src_offset: 0,
                dst_offset: 0,
                len: half,
            },
            Descriptor {
                src_offset: half,
                dst_offset: half,
                len: self.src.len() - half,
            },
        ];
        descriptors.into_iter().all(|d| self.transfer(d)) && self.src == self.dst
    }
}
