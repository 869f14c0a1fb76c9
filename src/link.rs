//! Boundary collaborator: the transport-specific swap handshake.
//!
//! The core never moves bytes off the device itself; it tells a [`HostLink`]
//! when a block changes hands. A link may be as thin as "the host polls
//! memory directly" ([`crate::region::MemPollLink`]) or drive a serial byte
//! pump; the three-phase shape is the same either way.

/// Retryable "host is not ready" condition.
///
/// Never surfaced to channel callers: the retry wrapper resolves it locally
/// and reports only `TraceError::Timeout` once the guard expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotReady;

/// Three-phase swap handshake plus the down-channel readiness poll.
pub trait HostLink {
    /// Phase 1: may the block pair be flipped right now (e.g. has the host
    /// finished reading the block about to be handed to it)? Must be free of
    /// side effects when it fails.
    fn swap_start(&mut self, current_block_id: u32) -> Result<(), NotReady>;

    /// Phase 2: announce the new active block. May be a no-op on transports
    /// where the host discovers the flip by polling memory.
    fn swap(&mut self, new_block_id: u32) -> Result<(), NotReady>;

    /// Phase 3: finalize, publishing the vacated block's committed fill
    /// level. Runs unconditionally, even after a partial phase 2.
    fn swap_end(&mut self, new_block_id: u32, previous_fill: u32) -> Result<(), NotReady>;

    /// Non-blocking: has the host queued down-channel data?
    fn host_data_pending(&self) -> bool;
}

/// A link with no host behind it: swaps always succeed, nothing is ever
/// pending. Useful for benchmarks and for running a target unobserved.
#[derive(Debug, Default)]
pub struct NullLink;

impl HostLink for NullLink {
    fn swap_start(&mut self, _current_block_id: u32) -> Result<(), NotReady> {
        Ok(())
    }

    fn swap(&mut self, _new_block_id: u32) -> Result<(), NotReady> {
        Ok(())
    }

    fn swap_end(&mut self, _new_block_id: u32, _previous_fill: u32) -> Result<(), NotReady> {
        Ok(())
    }

    fn host_data_pending(&self) -> bool {
        false
    }
}
