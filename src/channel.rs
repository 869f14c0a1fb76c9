//! Public channel façade: up-channel reservations and down-channel polling.
//!
//! One [`TraceChannel`] owns the block pair, the down-channel ring and the
//! transport link. Every mutating operation takes `&mut self`: the exclusive
//! borrow *is* the caller-held exclusion this protocol requires — the core
//! owns no lock of its own, so it stays usable from contexts where lock
//! semantics differ (interrupt-style callers included). Waiting is always a
//! guard-bounded retry loop on the caller's own thread of execution.

use crate::block::{BlockPair, MemBlock};
use crate::clock::{Clock, MonotonicClock, TimeoutGuard};
use crate::error::{Result, TraceError};
use crate::header::{self, HeaderFormat};
use crate::link::HostLink;
use crate::ring::RingBuf;
use crate::swap::SwapEngine;
use std::time::Duration;
use tracing::debug;

/// Channel configuration
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Record header encoding for the up-channel.
    pub header: HeaderFormat,
    /// Producer tag stamped into wide headers (host-side diagnostics only).
    pub producer_tag: u8,
    /// Pause between swap-handshake retries. Zero means pure spinning; some
    /// transports behave better with a small fixed delay under contention.
    pub retry_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            header: HeaderFormat::default(),
            producer_tag: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Bidirectional trace transport over a fixed pair of shared-memory blocks.
pub struct TraceChannel<L: HostLink, C: Clock = MonotonicClock> {
    blocks: BlockPair,
    down: RingBuf,
    link: L,
    clock: C,
    config: ChannelConfig,
}

impl<L: HostLink> TraceChannel<L, MonotonicClock> {
    /// Build a channel over two fixed blocks and the down-channel storage.
    ///
    /// Pass [`RingBuf::disabled`] to run without a down-channel; `get` then
    /// always reports "no data" and the swap engine never drains deposits.
    pub fn new(blocks: [MemBlock; 2], down: RingBuf, link: L, config: ChannelConfig) -> Self {
        Self::with_clock(blocks, down, link, config, MonotonicClock::new())
    }
}

impl<L: HostLink, C: Clock> TraceChannel<L, C> {
    /// Same as [`TraceChannel::new`] with an explicit time source, so tests
    /// can drive every timeout deterministically.
    pub fn with_clock(
        blocks: [MemBlock; 2],
        down: RingBuf,
        link: L,
        config: ChannelConfig,
        clock: C,
    ) -> Self {
        Self {
            blocks: BlockPair::new(blocks),
            down,
            link,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Largest payload a single `reserve` may request.
    pub fn usr_data_len_max(&self) -> u32 {
        self.config
            .header
            .usr_data_len_max(self.blocks.active().size())
    }

    /// Monotonic swap count; the active block is `active_index() mod 2`.
    pub fn active_index(&self) -> u32 {
        self.blocks.active_index()
    }

    /// Bytes reserved so far in the active block.
    pub fn active_fill(&self) -> u32 {
        self.blocks.active_fill()
    }

    /// Reserve `len` payload bytes in the active block.
    ///
    /// Writes an open record header and returns the payload pointer, valid
    /// for exactly `len` bytes. The slot stays flagged incomplete until
    /// [`Self::close`]; a host snapshot taken in between sees `wr_sz <
    /// block_sz` and discards the record. There is no reclamation for a
    /// record that is never closed.
    ///
    /// When the active block cannot hold the record, the block pair is
    /// swapped first, retrying the handshake until `timeout` expires.
    pub fn reserve(&mut self, len: u32, timeout: Duration) -> Result<*mut u8> {
        let max = self.usr_data_len_max();
        if len > max {
            return Err(TraceError::InvalidLength { max, got: len });
        }
        let header_size = self.config.header.size();
        let total = len + header_size;
        let block_size = self.blocks.active().size();
        if total > block_size {
            // Would never fit, full block or empty. Reject before any I/O.
            return Err(TraceError::InvalidLength {
                max: block_size - header_size,
                got: len,
            });
        }

        if !self.blocks.fits(total) {
            let guard = TimeoutGuard::new(&self.clock, timeout);
            let mut engine = SwapEngine {
                blocks: &mut self.blocks,
                down: &mut self.down,
                link: &mut self.link,
                retry_delay: self.config.retry_delay,
            };
            engine.swap_until(&guard, &self.clock)?;
        }

        let slot = self.blocks.claim(total);
        unsafe {
            header::write_open(self.config.header, slot, len, self.config.producer_tag);
            Ok(slot.add(header_size as usize))
        }
    }

    /// Mark the record behind a [`Self::reserve`]d payload pointer as
    /// complete. Rewrites only the header's `wr_sz` field; flushing to the
    /// host is deliberately decoupled and never triggered here.
    pub fn close(&mut self, payload: *mut u8) {
        let header_size = self.config.header.size() as usize;
        unsafe {
            header::close_at(self.config.header, payload.sub(header_size));
        }
    }

    /// Push reserved data toward the host until at most `min_bytes` remain
    /// in the active block. `min_bytes` is an optimization hint: a block
    /// already below it is left alone, and `flush(0, ..)` drains completely.
    /// Flushing an empty block is success, not an error.
    pub fn flush(&mut self, min_bytes: u32, timeout: Duration) -> Result<()> {
        if self.blocks.active_fill() < min_bytes {
            return Ok(());
        }
        let guard = TimeoutGuard::new(&self.clock, timeout);
        while self.blocks.active_fill() > min_bytes {
            let mut engine = SwapEngine {
                blocks: &mut self.blocks,
                down: &mut self.down,
                link: &mut self.link,
                retry_delay: self.config.retry_delay,
            };
            engine.swap_until(&guard, &self.clock)?;
        }
        Ok(())
    }

    /// Poll the down-channel, copying up to `buf.len()` buffered host bytes.
    ///
    /// Returns `Ok(0)` when nothing arrives before `timeout` — an empty poll
    /// is a normal outcome, not an error. When the ring is empty but the
    /// link reports pending host data, a swap is attempted to pull it in; a
    /// refused swap is retried within the budget, never surfaced.
    pub fn get(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.down.is_disabled() || buf.is_empty() {
            return Ok(0);
        }
        let guard = TimeoutGuard::new(&self.clock, timeout);
        loop {
            let copied = self.drain_ring(buf);
            if copied > 0 {
                return Ok(copied);
            }

            let pending = self.link.host_data_pending();
            if pending {
                let mut engine = SwapEngine {
                    blocks: &mut self.blocks,
                    down: &mut self.down,
                    link: &mut self.link,
                    retry_delay: self.config.retry_delay,
                };
                if engine.try_swap().is_err() {
                    debug!("host data pending but handshake refused, retrying");
                }
            }

            if guard.expired(&self.clock) {
                return Ok(0);
            }
            if !pending {
                self.clock.sleep(self.config.retry_delay);
            }
        }
    }

    /// Down-channel release hook. This protocol has no flow-control
    /// handshake back to the host, so there is nothing to do; the call
    /// exists for API symmetry with `get`.
    pub fn put(&mut self, _payload: &[u8]) {}

    /// Copy buffered down-channel bytes into `buf`, looping across the wrap
    /// boundary until the buffer is full or the ring runs dry.
    fn drain_ring(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            match self.down.consume((buf.len() - copied) as u32) {
                Some((ptr, len)) => {
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            ptr,
                            buf[copied..].as_mut_ptr(),
                            len as usize,
                        );
                    }
                    copied += len as usize;
                }
                None => break,
            }
        }
        copied
    }
}
