//! Master/slave rendezvous over a fixed-size shared memory record
//!
//! Two cooperating processes share one 548-byte mapped record and
//! coordinate through a hand-rolled four-phase flag protocol instead of
//! OS-level locks. This facade re-exports the member crates:
//!
//! - [`channel`]: record layout, flag state machine, mapping lifecycle
//! - [`master`]: the dispatcher and its asynchronous rendezvous cycle
//! - [`slave`]: a conforming worker peer

pub use rendezvous_channel as channel;
pub use rendezvous_master as master;
pub use rendezvous_slave as slave;

/// Re-export common types
pub mod prelude {
    pub use rendezvous_channel::{
        code, ChannelError, Phase, SharedChannel, SharedRecord, DEFAULT_CHANNEL_NAME,
    };
    pub use rendezvous_master::{
        CycleHandle, CycleInputs, CycleOutput, CycleProgress, CycleReport, DiscoveryWatcher,
        Dispatcher, ProcessScanDiscovery, RendezvousConfig, RendezvousError, SlaveDiscovery,
        SlaveStatus,
    };
    pub use rendezvous_slave::SlaveWorker;
}
