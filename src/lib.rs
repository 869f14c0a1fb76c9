//! tracelink - low-overhead trace streaming over shared memory
//!
//! This library moves variable-length trace records from a running target to
//! an external observing host, and small command payloads back, through a
//! fixed shared-memory region the host may read and write at any time.
//!
//! # Architecture
//!
//! - **Up-channel**: a double-buffered block pair; producers reserve
//!   header-prefixed slots in the active block, and a three-phase handshake
//!   hands full blocks to the host.
//! - **Down-channel**: host deposits are drained into a ring buffer during
//!   block swaps and polled out with `get`.
//! - **No internal locking, no blocking**: callers serialize access (the
//!   `&mut self` API is the exclusion token) and all waiting is a retry loop
//!   bounded by a timeout guard over an injected clock.

pub mod block;
pub mod channel;
pub mod clock;
pub mod error;
pub mod header;
pub mod link;
pub mod region;
pub mod ring;
pub mod shm;
mod swap;

pub use block::MemBlock;
pub use channel::{ChannelConfig, TraceChannel};
pub use clock::{Clock, ManualClock, MonotonicClock, TimeoutGuard};
pub use error::{Result, TraceError};
pub use header::{HeaderFormat, Record, RecordHeader, RecordIter};
pub use link::{HostLink, NotReady, NullLink};
pub use region::{MemPollLink, TraceRegion};
pub use ring::RingBuf;
