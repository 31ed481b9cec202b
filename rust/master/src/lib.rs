//! Dispatcher side of the shared memory rendezvous protocol
//!
//! Drives one full request/response cycle asynchronously over a
//! [`rendezvous_channel::SharedChannel`]: write inputs, signal readiness,
//! poll for the slave's phase transitions, read and validate outputs,
//! re-arm the channel, and report a single terminal outcome.

pub mod cycle;
pub mod discovery;
pub mod error;
pub mod report;

pub use cycle::*;
pub use discovery::*;
pub use error::*;
pub use report::*;
