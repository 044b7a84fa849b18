//! Message size limits.
//!
//! Unmarshalers refuse messages larger than the configured limit so a peer
//! cannot exhaust memory. The default of 4 MiB matches gRPC's default
//! receive limit.

use crate::error::Error;

/// Default maximum message size (4 MiB), matching gRPC's default receive limit.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Configuration for message size limits.
///
/// # Example
///
/// ```rust
/// use rerpc_core::MessageLimits;
///
/// // Use default 4 MiB limit
/// let limits = MessageLimits::default();
///
/// // Custom 16 MiB limit for large payloads
/// let limits = MessageLimits::new(16 * 1024 * 1024);
///
/// // No limit (not recommended for production)
/// let limits = MessageLimits::unlimited();
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageLimits {
    /// Maximum size of a single message in bytes.
    /// `None` means unlimited.
    max_message_size: Option<usize>,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_message_size: Some(DEFAULT_MAX_MESSAGE_SIZE),
        }
    }
}

impl MessageLimits {
    /// Create new limits with the specified maximum message size in bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size: Some(max_message_size),
        }
    }

    /// Create limits with no maximum.
    pub fn unlimited() -> Self {
        Self {
            max_message_size: None,
        }
    }

    /// Returns the maximum message size, or `None` if unlimited.
    pub fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }

    /// Fail with [`Code::ResourceExhausted`](crate::Code::ResourceExhausted)
    /// when `size` is over the limit.
    pub fn check_size(&self, size: usize) -> Result<(), Error> {
        match self.max_message_size {
            Some(max) if size > max => Err(Error::resource_exhausted(format!(
                "message size {size} bytes exceeds maximum allowed size of {max} bytes"
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = MessageLimits::default();
        assert_eq!(limits.max_message_size(), Some(DEFAULT_MAX_MESSAGE_SIZE));
    }

    #[test]
    fn test_check_size_exceeds_limit() {
        let limits = MessageLimits::new(1024);
        assert!(limits.check_size(1024).is_ok());
        let err = limits.check_size(1025).unwrap_err();
        assert_eq!(err.code(), crate::Code::ResourceExhausted);
        let message = err.message().unwrap();
        assert!(message.contains("1025"));
        assert!(message.contains("1024"));
    }

    #[test]
    fn test_check_size_unlimited() {
        let limits = MessageLimits::unlimited();
        assert!(limits.check_size(usize::MAX).is_ok());
    }
}
