//! Block swap state machine.
//!
//! A swap hands the full active block to the host and activates the other
//! one, through the three-phase [`HostLink`] handshake:
//!
//! 1. `swap_start` — ask whether the flip is safe. A refusal aborts the
//!    attempt with no state touched; the retry wrapper tries again until the
//!    timeout guard expires.
//! 2. commit — drain any payload the host deposited into the block about to
//!    become active, flip the pair, tell the link the new index.
//! 3. `swap_end` — finalize with the vacated block's fill level. Always
//!    runs, even when phase 2's drain was partial.
//!
//! Once phase 2 commits, the flip is visible to the host, so later link
//! failures are logged rather than retried: re-running the sequence would
//! flip the pair a second time and discard a block of records.

use crate::block::BlockPair;
use crate::clock::{Clock, TimeoutGuard};
use crate::error::Result;
use crate::link::{HostLink, NotReady};
use crate::ring::RingBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Size of the host deposit length field at the start of a vacated block.
pub(crate) const DEPOSIT_LEN_SIZE: u32 = 2;

/// Borrowed view over the channel parts a swap mutates.
pub(crate) struct SwapEngine<'a, L: HostLink> {
    pub blocks: &'a mut BlockPair,
    pub down: &'a mut RingBuf,
    pub link: &'a mut L,
    /// Pause between handshake retries. Zero spins; nonzero is the empirical
    /// contention mitigation some transports want, kept configurable.
    pub retry_delay: Duration,
}

impl<L: HostLink> SwapEngine<'_, L> {
    /// One full three-phase attempt.
    pub fn try_swap(&mut self) -> std::result::Result<(), NotReady> {
        self.link.swap_start(self.blocks.active_index())?;

        // Committed from here on: no early return below this line.
        self.drain_host_deposit();
        let (prev_fill, new_index) = self.blocks.commit_swap();

        let swapped = self.link.swap(new_index);
        let ended = self.link.swap_end(new_index, prev_fill);
        if swapped.is_err() {
            warn!(new_index, "link rejected committed swap notification");
        }
        if ended.is_err() {
            warn!(new_index, prev_fill, "link rejected swap finalization");
        }
        debug!(new_index, prev_fill, "block swap committed");
        Ok(())
    }

    /// Retry [`Self::try_swap`] until it succeeds or the guard expires.
    pub fn swap_until<C: Clock>(&mut self, guard: &TimeoutGuard, clock: &C) -> Result<()> {
        loop {
            if self.try_swap().is_ok() {
                return Ok(());
            }
            guard.check(clock)?;
            clock.sleep(self.retry_delay);
        }
    }

    /// Move any host-written `{ payload_len: u16 LE, payload }` from the
    /// start of the block about to become active into the down-channel ring,
    /// then zero the length field to acknowledge consumption.
    ///
    /// Runs before the flip, while the deposit's home is still the inactive
    /// block. A short write into the ring is reported as data loss and does
    /// not abort the swap.
    fn drain_host_deposit(&mut self) {
        if self.down.is_disabled() {
            return;
        }
        let incoming = self.blocks.inactive();
        if incoming.size() <= DEPOSIT_LEN_SIZE {
            return;
        }
        let base = incoming.start();
        let mut raw = [0u8; DEPOSIT_LEN_SIZE as usize];
        unsafe {
            core::ptr::copy_nonoverlapping(base as *const u8, raw.as_mut_ptr(), raw.len());
        }
        let mut total = u16::from_le_bytes(raw) as u32;
        if total == 0 {
            return;
        }
        let room = incoming.size() - DEPOSIT_LEN_SIZE;
        if total > room {
            // The host is uncoordinated; a bogus length must not walk off the
            // block.
            warn!(total, room, "host deposit length exceeds block, clamping");
            total = room;
        }

        let mut off = 0u32;
        while off < total {
            let chunk = (total - off).min(self.down.contiguous_free());
            if chunk == 0 {
                warn!(
                    lost = total - off,
                    "down-channel ring full during drain, dropping host bytes"
                );
                break;
            }
            let dst = match self.down.produce(chunk) {
                Some(dst) => dst,
                // The ring advertised the space one line up; refusing it now
                // means the shared state is corrupt and must not be limped on.
                None => panic!("ring refused a reservation it advertised"),
            };
            unsafe {
                core::ptr::copy_nonoverlapping(
                    base.add((DEPOSIT_LEN_SIZE + off) as usize) as *const u8,
                    dst,
                    chunk as usize,
                );
            }
            off += chunk;
        }

        unsafe {
            core::ptr::copy_nonoverlapping(0u16.to_le_bytes().as_ptr(), base, 2);
        }
        debug!(bytes = off, "drained host deposit into down-channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlock;
    use crate::clock::ManualClock;
    use crate::error::TraceError;
    use crate::link::NullLink;

    struct Fixture {
        blocks: BlockPair,
        down: RingBuf,
        _block_mem: [Vec<u8>; 2],
        _ring_mem: Vec<u8>,
    }

    fn fixture(block_size: u32, ring_capacity: u32) -> Fixture {
        let mut a = vec![0u8; block_size as usize];
        let mut b = vec![0u8; block_size as usize];
        let mut r = vec![0u8; ring_capacity as usize];
        let blocks = BlockPair::new([
            unsafe { MemBlock::new(a.as_mut_ptr(), block_size) },
            unsafe { MemBlock::new(b.as_mut_ptr(), block_size) },
        ]);
        let down = if ring_capacity == 0 {
            RingBuf::disabled()
        } else {
            unsafe { RingBuf::new(r.as_mut_ptr(), ring_capacity) }
        };
        Fixture {
            blocks,
            down,
            _block_mem: [a, b],
            _ring_mem: r,
        }
    }

    fn deposit(fx: &mut Fixture, payload: &[u8]) {
        let base = fx.blocks.inactive().start();
        unsafe {
            core::ptr::copy_nonoverlapping((payload.len() as u16).to_le_bytes().as_ptr(), base, 2);
            core::ptr::copy_nonoverlapping(payload.as_ptr(), base.add(2), payload.len());
        }
    }

    /// Link that refuses the first `refusals` swap_start calls.
    struct ReluctantLink {
        refusals: u32,
        started: u32,
        swapped: Vec<u32>,
        ended: Vec<(u32, u32)>,
    }

    impl ReluctantLink {
        fn new(refusals: u32) -> Self {
            Self {
                refusals,
                started: 0,
                swapped: Vec::new(),
                ended: Vec::new(),
            }
        }
    }

    impl HostLink for ReluctantLink {
        fn swap_start(&mut self, _current: u32) -> std::result::Result<(), NotReady> {
            self.started += 1;
            if self.started <= self.refusals {
                Err(NotReady)
            } else {
                Ok(())
            }
        }

        fn swap(&mut self, new: u32) -> std::result::Result<(), NotReady> {
            self.swapped.push(new);
            Ok(())
        }

        fn swap_end(&mut self, new: u32, fill: u32) -> std::result::Result<(), NotReady> {
            self.ended.push((new, fill));
            Ok(())
        }

        fn host_data_pending(&self) -> bool {
            false
        }
    }

    #[test]
    fn refused_swap_start_mutates_nothing() {
        let mut fx = fixture(128, 16);
        fx.blocks.claim(100);
        let mut link = ReluctantLink::new(u32::MAX);

        let mut engine = SwapEngine {
            blocks: &mut fx.blocks,
            down: &mut fx.down,
            link: &mut link,
            retry_delay: Duration::ZERO,
        };
        assert_eq!(engine.try_swap(), Err(NotReady));

        assert_eq!(fx.blocks.active_index(), 0);
        assert_eq!(fx.blocks.active_fill(), 100);
        assert_eq!(fx.down.used(), 0);
        assert!(link.swapped.is_empty());
        assert!(link.ended.is_empty());
    }

    #[test]
    fn committed_swap_reports_new_index_and_old_fill() {
        let mut fx = fixture(128, 16);
        fx.blocks.claim(102);
        let mut link = ReluctantLink::new(0);

        let mut engine = SwapEngine {
            blocks: &mut fx.blocks,
            down: &mut fx.down,
            link: &mut link,
            retry_delay: Duration::ZERO,
        };
        engine.try_swap().unwrap();

        assert_eq!(fx.blocks.active_index(), 1);
        assert_eq!(fx.blocks.active_fill(), 0);
        assert_eq!(link.swapped, vec![1]);
        assert_eq!(link.ended, vec![(1, 102)]);
    }

    #[test]
    fn retry_wrapper_times_out_against_a_stuck_host() {
        let mut fx = fixture(128, 0);
        let mut link = ReluctantLink::new(u32::MAX);
        let clock = ManualClock::new();
        let guard = TimeoutGuard::new(&clock, Duration::from_millis(5));

        let mut engine = SwapEngine {
            blocks: &mut fx.blocks,
            down: &mut fx.down,
            link: &mut link,
            retry_delay: Duration::from_millis(1),
        };
        let err = engine.swap_until(&guard, &clock).unwrap_err();
        assert!(matches!(err, TraceError::Timeout));
        // Budget 5ms, 1ms per retry: bounded number of handshake attempts.
        assert!(link.started >= 5 && link.started <= 7);
    }

    #[test]
    fn retry_wrapper_succeeds_once_host_relents() {
        let mut fx = fixture(128, 0);
        let mut link = ReluctantLink::new(3);
        let clock = ManualClock::new();
        let guard = TimeoutGuard::new(&clock, Duration::from_millis(100));

        let mut engine = SwapEngine {
            blocks: &mut fx.blocks,
            down: &mut fx.down,
            link: &mut link,
            retry_delay: Duration::from_millis(1),
        };
        engine.swap_until(&guard, &clock).unwrap();
        assert_eq!(link.started, 4);
        assert_eq!(fx.blocks.active_index(), 1);
    }

    #[test]
    fn drain_moves_deposit_and_acknowledges() {
        let mut fx = fixture(128, 32);
        deposit(&mut fx, b"host-cmd");
        let incoming = fx.blocks.inactive().start();
        let mut link = NullLink;

        let mut engine = SwapEngine {
            blocks: &mut fx.blocks,
            down: &mut fx.down,
            link: &mut link,
            retry_delay: Duration::ZERO,
        };
        engine.try_swap().unwrap();

        let (ptr, len) = fx.down.consume(32).unwrap();
        let got = unsafe { core::slice::from_raw_parts(ptr, len as usize) };
        assert_eq!(got, b"host-cmd");
        // Length field zeroed as the consumption acknowledgement.
        let ack = unsafe { core::slice::from_raw_parts(incoming as *const u8, 2) };
        assert_eq!(ack, &[0, 0]);
    }

    #[test]
    fn short_drain_loses_tail_but_swap_completes() {
        let mut fx = fixture(128, 4);
        deposit(&mut fx, b"0123456789");
        let mut link = NullLink;

        let mut engine = SwapEngine {
            blocks: &mut fx.blocks,
            down: &mut fx.down,
            link: &mut link,
            retry_delay: Duration::ZERO,
        };
        engine.try_swap().unwrap();

        assert_eq!(fx.blocks.active_index(), 1);
        let (ptr, len) = fx.down.consume(16).unwrap();
        let got = unsafe { core::slice::from_raw_parts(ptr, len as usize) };
        assert_eq!(got, b"0123");
        assert!(fx.down.consume(16).is_none());
    }

    #[test]
    fn disabled_ring_skips_drain_entirely() {
        let mut fx = fixture(128, 0);
        deposit(&mut fx, b"ignored");
        let mut link = NullLink;

        let mut engine = SwapEngine {
            blocks: &mut fx.blocks,
            down: &mut fx.down,
            link: &mut link,
            retry_delay: Duration::ZERO,
        };
        engine.try_swap().unwrap();

        // Deposit is untouched: with the down-channel disabled the engine
        // must not even acknowledge it.
        let base = fx.blocks.active().start();
        let len = unsafe { core::slice::from_raw_parts(base as *const u8, 2) };
        assert_eq!(u16::from_le_bytes([len[0], len[1]]), 7);
    }
}
