//! Shared memory channel for the master/slave rendezvous protocol
//!
//! Owns the canonical wire format (the fixed 548-byte [`SharedRecord`]),
//! the four-phase flag state machine, and the OS mapping lifecycle. All
//! mutual exclusion above this layer is a protocol convention: each record
//! field has exactly one legitimate writer per phase.

pub mod channel;
pub mod error;
pub mod phase;
pub mod record;

pub use channel::*;
pub use error::*;
pub use phase::*;
pub use record::*;

/// Sentinel written once at creation; a mismatch means the mapping is
/// corrupted or is not ours.
pub const PROTOCOL_MAGIC: u32 = 0xDEAD_BEEF;

/// Current version of the rendezvous record layout.
pub const PROTOCOL_VERSION: u32 = 1;

/// Well-known mapping name shared by both processes.
pub const DEFAULT_CHANNEL_NAME: &str = "ipc_masterslave_shm";

/// Result codes the slave writes into `code_result`.
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const INVALID_RANGE: i32 = 1;
    pub const SUM_OVERFLOW: i32 = 2;
    pub const FILE_WRITE_FAILED: i32 = 3;
}
