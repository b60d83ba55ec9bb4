//! # Realtime Errors
//!
//! Transport failures are recoverable: the supervisor retries them and
//! subscribers see a "reconnecting" status rather than a torn-down
//! subscription.

use std::time::Duration;

use livewire_common::LivewireError;
use thiserror::Error;

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Failures of the underlying transport. `Clone` so a single open failure
/// can be handed to every subscriber waiting on that channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel '{topic}' rejected: {reason}")]
    ChannelRejected { topic: String, reason: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("transport closed")]
    Closed,
}

/// Realtime errors surfaced to application code.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("not subscribed to '{0}'")]
    NotSubscribed(String),

    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),

    #[error("registry has been shut down")]
    RegistryClosed,
}

impl RealtimeError {
    /// Whether retrying later can succeed without caller changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, RealtimeError::Transport(_))
    }
}

impl From<RealtimeError> for LivewireError {
    fn from(err: RealtimeError) -> Self {
        LivewireError::Realtime(err.to_string())
    }
}

impl From<TransportError> for LivewireError {
    fn from(err: TransportError) -> Self {
        LivewireError::Realtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient() {
        let err: RealtimeError = TransportError::NotConnected.into();
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "transport is not connected");

        assert!(!RealtimeError::InvalidTopic(String::new()).is_transient());
        assert!(!RealtimeError::RegistryClosed.is_transient());
    }

    #[test]
    fn channel_rejected_display() {
        let err = TransportError::ChannelRejected {
            topic: "chat-123".into(),
            reason: "unauthorized".into(),
        };
        assert_eq!(err.to_string(), "channel 'chat-123' rejected: unauthorized");
    }

    #[test]
    fn realtime_errors_lift_into_livewire_error() {
        let err: LivewireError = RealtimeError::NotSubscribed("room".into()).into();
        assert!(matches!(err, LivewireError::Realtime(_)));
        assert_eq!(err.to_string(), "realtime error: not subscribed to 'room'");

        let err: LivewireError = TransportError::NotConnected.into();
        assert_eq!(err.to_string(), "realtime error: transport is not connected");
    }
}
