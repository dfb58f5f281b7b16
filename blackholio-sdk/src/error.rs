//! Errors surfaced by the connection handle and its callbacks.

/// Failures reported by the SDK.
///
/// Cloneable so the same error can be handed to a callback and logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The server address is empty or uses an unsupported scheme.
    #[error("invalid server uri `{0}`")]
    InvalidUri(String),
    /// No module name was configured.
    #[error("module name must not be empty")]
    MissingModuleName,
    /// The service refused or failed the connection handshake.
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    /// The service closed an established connection.
    #[error("disconnected: {0}")]
    Disconnected(String),
    /// A subscription request was rejected.
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),
    /// The operation needs an active connection.
    #[error("not connected")]
    NotConnected,
    /// The transport side of the link went away without saying goodbye.
    #[error("connection channel closed")]
    ChannelClosed,
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
