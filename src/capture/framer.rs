/// Reassembles device callbacks into fixed-size blocks.
///
/// Input devices deliver audio at whatever granularity the OS picked;
/// the session channel wants steady fixed-size blocks (4096 samples by
/// default). Samples are carried over between pushes, never dropped.
#[derive(Debug)]
pub struct FrameAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size.max(1)),
        }
    }

    /// Append samples and drain every completed block.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            blocks.push(std::mem::replace(&mut self.pending, rest));
        }
        blocks
    }

    /// Remaining samples that have not yet filled a block.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}
