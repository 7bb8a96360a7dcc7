//! Connector Error Types
//!
//! Unified error handling for the connector core. Every fallible operation
//! on the client surface resolves to one of these variants so callers can
//! match on the failure class instead of parsing messages.

use serde::Serialize;

/// Errors surfaced by the connector core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum ConnectorError {
    /// The operation requires an active wallet session
    #[error("no wallet session is active")]
    NotConnected,

    /// No registered wallet matches the requested name
    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    /// The connect attempt was superseded by a newer attempt or an explicit
    /// disconnect. Never emitted as an error event.
    #[error("connection cancelled")]
    ConnectionCancelled,

    /// The requested account is not part of the active session
    #[error("account {0} is not part of the active session")]
    InvalidAccount(String),

    /// The wallet does not advertise the required capability
    #[error("wallet {wallet} does not support {feature}")]
    UnsupportedFeature { wallet: String, feature: String },

    /// Passthrough wrap of whatever the underlying wallet provider reported
    #[error("provider error: {0}")]
    Provider(String),

    /// Storage backend read/write failure, always recovered locally
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted or input value failed a registered validator
    #[error("validation failed: {0}")]
    Validation(String),
}

impl ConnectorError {
    /// Wrap an arbitrary provider failure
    pub fn provider(err: impl std::fmt::Display) -> Self {
        ConnectorError::Provider(err.to_string())
    }

    /// True for the structured cancellation signal, so UI layers can suppress
    /// error surfaces for user-initiated cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConnectorError::ConnectionCancelled)
    }

    /// Whether a retry can reasonably succeed. Only a permanent capability
    /// mismatch is considered unrecoverable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ConnectorError::UnsupportedFeature { .. })
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_distinguishable() {
        assert!(ConnectorError::ConnectionCancelled.is_cancellation());
        assert!(!ConnectorError::Provider("user rejected".to_string()).is_cancellation());
    }

    #[test]
    fn test_recoverability() {
        assert!(ConnectorError::WalletNotFound("Phantom".to_string()).is_recoverable());
        assert!(ConnectorError::Provider("popup closed".to_string()).is_recoverable());
        assert!(!ConnectorError::UnsupportedFeature {
            wallet: "Ledger".to_string(),
            feature: "sign-and-send".to_string(),
        }
        .is_recoverable());
    }
}
