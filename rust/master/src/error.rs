//! Error types for the dispatcher side

use rendezvous_channel::ChannelError;
use thiserror::Error;

/// Terminal outcomes of a rendezvous cycle, plus dispatch precondition
/// failures. Every error is reported exactly once; there is no retry at
/// this layer. A retry is a new, independently counted cycle.
#[derive(Error, Debug)]
pub enum RendezvousError {
    /// Mapping allocation or record corruption, from the channel layer
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The slave never left `MasterReady` within the handshake timeout
    #[error("slave did not acknowledge within {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    /// The configured completion deadline fired before `SlaveFinished`
    #[error("slave did not finish within {timeout_ms}ms")]
    CompletionTimeout { timeout_ms: u64 },

    /// The echoed counter does not match the dispatched one: a stale or
    /// duplicate answer, e.g. from an abandoned prior cycle
    #[error("stale response: dispatched counter {expected}, slave echoed {actual}")]
    InvalidResponseCounter { expected: u32, actual: u32 },

    /// The slave answered with a nonzero result code
    #[error("slave reported failure code {code}")]
    SlaveReportedFailure { code: i32 },

    /// Dispatch precondition: discovery does not report the slave alive
    #[error("slave process is not running")]
    SlaveNotRunning,

    /// Dispatch precondition: only one cycle may be outstanding
    #[error("a cycle is already outstanding on this channel")]
    CycleInFlight,

    /// Defensive fallback for uncategorized failures
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, RendezvousError>;

impl RendezvousError {
    /// Numeric status code for display, mirroring what the slave wrote
    /// where one exists.
    pub fn status_code(&self) -> i32 {
        match self {
            RendezvousError::SlaveReportedFailure { code } => *code,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slave_failure_keeps_its_code() {
        let err = RendezvousError::SlaveReportedFailure { code: 2 };
        assert_eq!(err.status_code(), 2);
        assert!(err.to_string().contains("code 2"));
    }

    #[test]
    fn channel_errors_convert() {
        let err: RendezvousError = ChannelError::Corruption("bad magic".into()).into();
        assert!(matches!(err, RendezvousError::Channel(_)));
    }
}
