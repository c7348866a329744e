//! Error definitions for the device management protocol

use super::envelope::CorrelationId;
use thiserror::Error;

/// Errors surfaced by the protocol engine and the device worker
#[derive(Debug, Error)]
pub enum ManagementError {
    /// An operation was attempted while the transport is down
    #[error("client must be connected")]
    NotConnected,

    /// Local parameter validation failed; nothing was published
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A response or acknowledgment referenced an id with no pending entry
    #[error("unknown request: {0}")]
    UnknownCorrelationId(CorrelationId),

    /// The generator produced an id that is already pending
    #[error("correlation id already pending: {0}")]
    DuplicateCorrelationId(CorrelationId),

    /// The wire payload could not be decoded into an envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The transport refused to queue a publish or subscribe
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// The device worker is gone
    #[error("channel error: {0}")]
    ChannelClosed(String),
}

impl ManagementError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ManagementError::InvalidArgument(msg.into())
    }
}
