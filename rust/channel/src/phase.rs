//! The four-phase flag state machine
//!
//! The `flags` field of the record holds exactly one of these values at
//! any instant. Transitions and their sole legitimate writers:
//!
//! 1. `Idle -> MasterReady` (master): dispatch signal, written after all
//!    input fields are populated.
//! 2. `MasterReady -> SlaveStarted` (slave): optional acknowledgment.
//! 3. `MasterReady | SlaveStarted -> SlaveFinished` (slave): written
//!    after all output fields are populated.
//! 4. `SlaveFinished -> Idle` (master): written after outputs are
//!    consumed, re-arms the channel.

/// Protocol phase encoded in the record's `flags` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Phase {
    Idle = 0,
    MasterReady = 1,
    SlaveStarted = 2,
    SlaveFinished = 3,
}

impl Phase {
    /// Decode a raw flag value. `None` means the field holds a value
    /// outside the protocol, which readers must treat as corruption.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Phase::Idle),
            1 => Some(Phase::MasterReady),
            2 => Some(Phase::SlaveStarted),
            3 => Some(Phase::SlaveFinished),
            _ => None,
        }
    }

    /// Raw wire encoding of this phase.
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// True once the slave has moved the flag past `MasterReady`.
    pub fn is_acknowledged(self) -> bool {
        matches!(self, Phase::SlaveStarted | Phase::SlaveFinished)
    }
}
