//! Worker side of the shared memory rendezvous protocol
//!
//! A conforming peer: polls for `MasterReady`, acknowledges, computes the
//! inclusive range sum, leaves a result artifact in the master-specified
//! folder, echoes the request counter, and signals `SlaveFinished`.

pub mod worker;

pub use worker::*;
