//! Shared trace-region layout and the memory-poll transport.
//!
//! A region is one shm object both sides map:
//!
//! - a control header (magic, version, geometry, handshake words)
//! - block 0 and block 1 (the up-channel double buffer)
//! - the down-channel ring storage
//!
//! The handshake words implement [`HostLink`] for the transport variant
//! where the host simply polls memory: `host_owned[i]` hands a vacated block
//! to the probe and back, `fill_len[i]` publishes its committed fill level
//! (the only fill figure a probe may trust), and `host_pending` flags a
//! down-channel deposit. Every region offset is fixed at creation; neither
//! side ever moves a block.

use crate::block::MemBlock;
use crate::channel::{ChannelConfig, TraceChannel};
use crate::error::{Result, TraceError};
use crate::link::{HostLink, NotReady};
use crate::ring::RingBuf;
use crate::shm::SharedMem;
use crate::swap::DEPOSIT_LEN_SIZE;
use std::sync::atomic::{AtomicU32, Ordering};

/// `b"TLNK"` as a little-endian `u32`.
pub const REGION_MAGIC: u32 = 0x4B4E_4C54;

/// Region layout version.
pub const REGION_VERSION: u32 = 1;

/// Blocks and ring storage start on cache-line boundaries.
const REGION_ALIGN: usize = 64;

/// Control words at the base of every region.
#[repr(C)]
struct RegionHeader {
    magic: u32,
    version: u32,
    block_size: u32,
    down_capacity: u32,
    /// Monotonic swap count; active block is `active_index % 2`.
    active_index: AtomicU32,
    /// Committed fill level of each block, valid while `host_owned[i]` is set.
    fill_len: [AtomicU32; 2],
    /// 1 while block `i` is vacated and belongs to the probe.
    host_owned: [AtomicU32; 2],
    /// Set by the probe after a deposit, cleared by the target on swap.
    host_pending: AtomicU32,
}

const fn align_up(v: usize) -> usize {
    (v + REGION_ALIGN - 1) & !(REGION_ALIGN - 1)
}

#[derive(Clone, Copy)]
struct RegionLayout {
    block: [usize; 2],
    down: usize,
    total: usize,
}

impl RegionLayout {
    fn new(block_size: u32, down_capacity: u32) -> Self {
        let block0 = align_up(std::mem::size_of::<RegionHeader>());
        let block1 = block0 + align_up(block_size as usize);
        let down = block1 + align_up(block_size as usize);
        Self {
            block: [block0, block1],
            down,
            total: down + down_capacity as usize,
        }
    }
}

/// A mapped trace region: the target creates it, the probe opens it.
pub struct TraceRegion {
    shm: SharedMem,
}

impl TraceRegion {
    /// Create a region with two `block_size`-byte blocks and
    /// `down_capacity` bytes of down-channel storage (0 disables the
    /// down-channel).
    pub fn create(name: &str, block_size: u32, down_capacity: u32) -> Result<Self> {
        let layout = RegionLayout::new(block_size, down_capacity);
        let shm = SharedMem::create(name, layout.total)?;

        let header = shm.as_ptr() as *mut RegionHeader;
        unsafe {
            (*header).magic = REGION_MAGIC;
            (*header).version = REGION_VERSION;
            (*header).block_size = block_size;
            (*header).down_capacity = down_capacity;
            (*header).active_index = AtomicU32::new(0);
            (*header).fill_len = [AtomicU32::new(0), AtomicU32::new(0)];
            (*header).host_owned = [AtomicU32::new(0), AtomicU32::new(0)];
            (*header).host_pending = AtomicU32::new(0);
        }

        Ok(Self { shm })
    }

    /// Map an existing region (the probe side). Validates magic and version.
    pub fn open(name: &str) -> Result<Self> {
        let shm = SharedMem::open(name)?;
        if shm.size() < std::mem::size_of::<RegionHeader>() {
            return Err(TraceError::BadMagic {
                expected: REGION_MAGIC,
                got: 0,
            });
        }
        let region = Self { shm };
        let header = region.header();
        if header.magic != REGION_MAGIC {
            return Err(TraceError::BadMagic {
                expected: REGION_MAGIC,
                got: header.magic,
            });
        }
        if header.version != REGION_VERSION {
            return Err(TraceError::BadVersion {
                expected: REGION_VERSION,
                got: header.version,
            });
        }
        Ok(region)
    }

    fn header(&self) -> &RegionHeader {
        unsafe { &*(self.shm.as_ptr() as *const RegionHeader) }
    }

    fn layout(&self) -> RegionLayout {
        RegionLayout::new(self.block_size(), self.down_capacity())
    }

    fn block_ptr(&self, slot: usize) -> *mut u8 {
        unsafe { self.shm.as_ptr().add(self.layout().block[slot % 2]) }
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.header().block_size
    }

    #[inline]
    pub fn down_capacity(&self) -> u32 {
        self.header().down_capacity
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.shm.name()
    }

    /// Monotonic swap count published by the target.
    pub fn active_index(&self) -> u32 {
        self.header().active_index.load(Ordering::Acquire)
    }

    /// Turn the region into the target-side channel.
    ///
    /// The returned link keeps the mapping alive, so the blocks stay at
    /// stable addresses for the channel's whole lifetime.
    pub fn into_channel(self, config: ChannelConfig) -> TraceChannel<MemPollLink> {
        let block_size = self.block_size();
        let down_capacity = self.down_capacity();
        let layout = self.layout();
        let base = self.shm.as_ptr();

        let blocks = unsafe {
            [
                MemBlock::new(base.add(layout.block[0]), block_size),
                MemBlock::new(base.add(layout.block[1]), block_size),
            ]
        };
        let down = if down_capacity == 0 {
            RingBuf::disabled()
        } else {
            unsafe { RingBuf::new(base.add(layout.down), down_capacity) }
        };
        TraceChannel::new(blocks, down, MemPollLink { shm: self.shm }, config)
    }

    // Probe-side operations.

    /// Claim the vacated block if the target has handed one over. Returns
    /// the block slot and its bytes up to the committed fill level.
    ///
    /// Hold the block only briefly: the target cannot re-activate it until
    /// [`TraceRegion::release_block`].
    pub fn take_block(&self) -> Option<(u32, &[u8])> {
        let header = self.header();
        for slot in 0..2usize {
            if header.host_owned[slot].load(Ordering::Acquire) == 1 {
                let fill = header.fill_len[slot].load(Ordering::Acquire);
                let len = fill.min(self.block_size()) as usize;
                let bytes = unsafe { core::slice::from_raw_parts(self.block_ptr(slot), len) };
                return Some((slot as u32, bytes));
            }
        }
        None
    }

    /// Return a taken block to the target, allowing the next swap into it.
    pub fn release_block(&self, slot: u32) {
        self.header().host_owned[(slot % 2) as usize].store(0, Ordering::Release);
    }

    /// Write a down-channel payload into the start of a block the probe
    /// currently owns and flag it for the target. Returns `false` when the
    /// payload cannot fit the block.
    pub fn deposit(&self, slot: u32, payload: &[u8]) -> bool {
        let room = self.block_size().saturating_sub(DEPOSIT_LEN_SIZE) as usize;
        if payload.len() > room || payload.len() > u16::MAX as usize {
            return false;
        }
        let base = self.block_ptr(slot as usize);
        unsafe {
            core::ptr::copy_nonoverlapping(payload.as_ptr(), base.add(2), payload.len());
            core::ptr::copy_nonoverlapping((payload.len() as u16).to_le_bytes().as_ptr(), base, 2);
        }
        self.header().host_pending.store(1, Ordering::Release);
        true
    }
}

/// [`HostLink`] for the memory-poll transport: the handshake is nothing but
/// the region's control words, and `swap` itself moves no bytes.
pub struct MemPollLink {
    shm: SharedMem,
}

impl MemPollLink {
    fn header(&self) -> &RegionHeader {
        unsafe { &*(self.shm.as_ptr() as *const RegionHeader) }
    }
}

impl HostLink for MemPollLink {
    fn swap_start(&mut self, current_block_id: u32) -> std::result::Result<(), NotReady> {
        // The block about to become active must have been released by the
        // probe; refusing here mutates nothing.
        let next_slot = (1 - current_block_id % 2) as usize;
        if self.header().host_owned[next_slot].load(Ordering::Acquire) == 0 {
            Ok(())
        } else {
            Err(NotReady)
        }
    }

    fn swap(&mut self, new_block_id: u32) -> std::result::Result<(), NotReady> {
        let header = self.header();
        header.active_index.store(new_block_id, Ordering::Release);
        // Any deposit in the newly activated block was drained just before
        // this notification.
        header.host_pending.store(0, Ordering::Release);
        Ok(())
    }

    fn swap_end(&mut self, new_block_id: u32, previous_fill: u32) -> std::result::Result<(), NotReady> {
        let vacated = ((new_block_id + 1) % 2) as usize;
        let header = self.header();
        header.fill_len[vacated].store(previous_fill, Ordering::Release);
        header.host_owned[vacated].store(1, Ordering::Release);
        Ok(())
    }

    fn host_data_pending(&self) -> bool {
        self.header().host_pending.load(Ordering::Acquire) != 0
    }
}
