//! Channel specific error types

use thiserror::Error;

/// Errors raised by the shared memory channel layer.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The OS could not create or map the region
    #[error("shared memory allocation failed: {0}")]
    Allocation(String),

    /// Magic/version/size mismatch, or record contents that cannot be decoded
    #[error("shared record corrupted: {0}")]
    Corruption(String),

    /// The mapping name is not usable on this platform
    #[error("invalid channel name: {0}")]
    InvalidName(String),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, ChannelError>;

impl ChannelError {
    /// Convert platform-specific error codes to ChannelError
    pub fn from_platform_error(errno: i32, message: impl Into<String>) -> Self {
        ChannelError::Allocation(format!("{} (os error {})", message.into(), errno))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_error_carries_errno() {
        let err = ChannelError::from_platform_error(13, "shm_open failed");
        assert!(err.to_string().contains("os error 13"));
        assert!(err.to_string().contains("shm_open failed"));
    }
}
