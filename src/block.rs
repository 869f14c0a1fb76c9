//! The fixed block pair backing the up-channel.
//!
//! Two blocks are handed in once at channel construction and never move or
//! resize: the external probe depends on stable addresses. At any moment one
//! block is *active* (open for reservations) and the other is *vacated*
//! (exposed to the host). The active index grows monotonically; the block in
//! use is `active_index mod 2`.

/// One of the two fixed shared-memory blocks.
pub struct MemBlock {
    start: *mut u8,
    size: u32,
}

// SAFETY: the block is a dumb address range; all synchronization with the
// probe happens through the header codec and the swap handshake.
unsafe impl Send for MemBlock {}

impl MemBlock {
    /// Wrap `size` bytes starting at `start`.
    ///
    /// # Safety
    /// The range must stay valid and at a stable address for the lifetime of
    /// the channel; the external probe reads and writes it asynchronously.
    pub unsafe fn new(start: *mut u8, size: u32) -> Self {
        Self { start, size }
    }

    #[inline]
    pub fn start(&self) -> *mut u8 {
        self.start
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Which block is active and how full each one is.
///
/// Mutated only by the swap engine and the reservation step, under the
/// caller-held exclusion the crate contract requires.
pub(crate) struct BlockPair {
    blocks: [MemBlock; 2],
    active_index: u32,
    fill: [u32; 2],
}

impl BlockPair {
    pub fn new(blocks: [MemBlock; 2]) -> Self {
        Self {
            blocks,
            active_index: 0,
            fill: [0; 2],
        }
    }

    #[inline]
    pub fn active_index(&self) -> u32 {
        self.active_index
    }

    #[inline]
    fn active_slot(&self) -> usize {
        (self.active_index % 2) as usize
    }

    #[inline]
    pub fn active(&self) -> &MemBlock {
        &self.blocks[self.active_slot()]
    }

    /// The vacated block, currently exposed to the host.
    #[inline]
    pub fn inactive(&self) -> &MemBlock {
        &self.blocks[1 - self.active_slot()]
    }

    /// Bytes already reserved in the active block.
    #[inline]
    pub fn active_fill(&self) -> u32 {
        self.fill[self.active_slot()]
    }

    /// Can the active block still take `total` more bytes?
    #[inline]
    pub fn fits(&self, total: u32) -> bool {
        self.active_fill() + total <= self.active().size()
    }

    /// Claim `total` bytes at the current fill marker and advance it.
    /// Returns the start of the claimed slot.
    pub fn claim(&mut self, total: u32) -> *mut u8 {
        debug_assert!(self.fits(total));
        let slot = self.active_slot();
        let at = self.fill[slot];
        self.fill[slot] += total;
        unsafe { self.blocks[slot].start().add(at as usize) }
    }

    /// Flip the pair: the inactive block becomes active with a fresh fill
    /// marker. Returns the vacated block's final fill level and the new
    /// active index.
    pub fn commit_swap(&mut self) -> (u32, u32) {
        let prev_fill = self.active_fill();
        self.active_index = self.active_index.wrapping_add(1);
        let slot = self.active_slot();
        self.fill[slot] = 0;
        (prev_fill, self.active_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(size: u32) -> (BlockPair, Vec<u8>, Vec<u8>) {
        let mut a = vec![0u8; size as usize];
        let mut b = vec![0u8; size as usize];
        let pair = BlockPair::new([
            unsafe { MemBlock::new(a.as_mut_ptr(), size) },
            unsafe { MemBlock::new(b.as_mut_ptr(), size) },
        ]);
        (pair, a, b)
    }

    #[test]
    fn claim_advances_fill() {
        let (mut pair, _a, _b) = pair(128);
        let base = pair.active().start();

        let first = pair.claim(102);
        assert_eq!(first, base);
        assert_eq!(pair.active_fill(), 102);
        assert!(!pair.fits(32));
        assert!(pair.fits(26));
    }

    #[test]
    fn swap_flips_and_resets_fill() {
        let (mut pair, _a, _b) = pair(128);
        pair.claim(100);
        let vacated = pair.active().start();

        let (prev_fill, new_index) = pair.commit_swap();
        assert_eq!(prev_fill, 100);
        assert_eq!(new_index, 1);
        assert_eq!(pair.active_fill(), 0);
        assert_eq!(pair.inactive().start(), vacated);

        // Index keeps growing; the block cycles.
        pair.commit_swap();
        assert_eq!(pair.active_index(), 2);
        assert_eq!(pair.active().start(), vacated);
    }
}
