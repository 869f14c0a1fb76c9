//! Error types for tracelink

use std::io;
use thiserror::Error;

/// Result type for tracelink operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors that can occur in tracelink operations
#[derive(Debug, Error)]
pub enum TraceError {
    /// Requested record length exceeds what the active block can carry.
    /// Rejected before any shared state is touched.
    #[error("Invalid record length: max {max} bytes, got {got} bytes")]
    InvalidLength { max: u32, got: u32 },

    /// A retry loop exhausted its timeout budget. Distinct from the
    /// down-channel's "no data" outcome, which is not an error.
    #[error("Timed out waiting for the host")]
    Timeout,

    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to size shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Region name too long for shm_open
    #[error("Region name too long: max {max} chars, got {got}")]
    NameTooLong { max: usize, got: usize },

    /// Mapped region does not carry a tracelink header
    #[error("Invalid region magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    BadMagic { expected: u32, got: u32 },

    /// Region was built with an incompatible layout version
    #[error("Unsupported region version: expected {expected}, got {got}")]
    BadVersion { expected: u32, got: u32 },
}
