// BlueProbe Core: BLE discovery spine
//
// Scan sessions, the per-session device registry, the payload address
// heuristic and connection hand-off. Everything radio-specific sits behind
// the `Radio` trait so the core runs the same against btleplug or a mock.

pub mod discovery;
pub mod radio;
pub mod validate;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use discovery::{
    derive_address, ConnectState, ConnectionManager, ConnectionStatus, Device, DeviceRegistry,
    ScanConfig, ScanController, ScanEvent, SessionPhase, DEFAULT_SCAN_WINDOW,
};
pub use radio::{DiscoveryEvent, Radio, RadioError, RadioEvent, RadioState};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failures surfaced by the discovery operations.
///
/// Every variant carries enough detail for a caller to log it; `kind()` gives
/// the stable discriminant used on the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),
    #[error("Scan session {session_id} already in progress")]
    Busy { session_id: u64 },
    #[error("Device not found: {0}")]
    NotFound(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Wire-level error discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidInput,
    RadioUnavailable,
    Busy,
    NotFound,
    ConnectionFailed,
}

impl ErrorKind {
    /// Whether the same request may succeed later without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Busy | ErrorKind::ConnectionFailed)
    }
}

impl DiscoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscoveryError::InvalidInput(_) => ErrorKind::InvalidInput,
            DiscoveryError::RadioUnavailable(_) => ErrorKind::RadioUnavailable,
            DiscoveryError::Busy { .. } => ErrorKind::Busy,
            DiscoveryError::NotFound(_) => ErrorKind::NotFound,
            DiscoveryError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
        }
    }

    /// Human-readable detail without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            DiscoveryError::InvalidInput(d)
            | DiscoveryError::RadioUnavailable(d)
            | DiscoveryError::NotFound(d)
            | DiscoveryError::ConnectionFailed(d) => d.clone(),
            DiscoveryError::Busy { session_id } => {
                format!("scan session {} is still running", session_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DiscoveryError::InvalidInput("x".into()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            DiscoveryError::Busy { session_id: 3 }.kind(),
            ErrorKind::Busy
        );
        assert_eq!(
            DiscoveryError::NotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Busy.is_retryable());
        assert!(ErrorKind::ConnectionFailed.is_retryable());
        assert!(!ErrorKind::InvalidInput.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::RadioUnavailable.is_retryable());
    }

    #[test]
    fn test_busy_detail_names_session() {
        let err = DiscoveryError::Busy { session_id: 7 };
        assert!(err.detail().contains('7'));
        assert_eq!(err.to_string(), "Scan session 7 already in progress");
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::RadioUnavailable).unwrap();
        assert_eq!(json, "\"radioUnavailable\"");
    }
}
