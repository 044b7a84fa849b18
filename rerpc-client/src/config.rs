//! Client stream configuration.

use rerpc_core::MessageLimits;

/// Settings for a [`ClientStream`](crate::ClientStream).
///
/// # Example
///
/// ```rust
/// use rerpc_client::ClientStreamConfig;
/// use rerpc_core::MessageLimits;
///
/// let config = ClientStreamConfig::default()
///     .limits(MessageLimits::new(16 * 1024 * 1024))
///     .gzip_request(true);
/// assert!(config.is_gzip_request());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStreamConfig {
    limits: MessageLimits,
    gzip_request: bool,
}

impl ClientStreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum size of a single response message.
    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Gzip every request message.
    pub fn gzip_request(mut self, enabled: bool) -> Self {
        self.gzip_request = enabled;
        self
    }

    pub fn message_limits(&self) -> MessageLimits {
        self.limits
    }

    pub fn is_gzip_request(&self) -> bool {
        self.gzip_request
    }
}
