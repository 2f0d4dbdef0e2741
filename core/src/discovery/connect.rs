//! Connection manager
//!
//! Resolves an identifier against the radio's own peripheral cache, which is
//! independent of any scan session, and drives a single connect attempt.

use crate::radio::Radio;
use crate::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome reported for a successful connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectState {
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: ConnectState,
    pub id: String,
}

/// Connects to peripherals the radio already knows about
pub struct ConnectionManager<R: Radio> {
    radio: Arc<R>,
    connect_timeout: Option<Duration>,
}

impl<R: Radio> ConnectionManager<R> {
    pub fn new(radio: Arc<R>, connect_timeout: Option<Duration>) -> Self {
        Self {
            radio,
            connect_timeout,
        }
    }

    /// Connect to the peripheral with the given identifier.
    ///
    /// Never scans: an identifier the radio has not seen fails with
    /// `NotFound`. Failed attempts are not retried.
    pub async fn connect(&self, id: &str) -> Result<ConnectionStatus, DiscoveryError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DiscoveryError::InvalidInput(
                "missing device id".to_string(),
            ));
        }

        let peripheral = self
            .radio
            .peripheral(id)
            .await
            .map_err(|e| {
                DiscoveryError::ConnectionFailed(format!("peripheral lookup failed: {}", e))
            })?
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))?;

        let attempt = self.radio.connect(&peripheral);
        let outcome = match self.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Connect to {} timed out after {:?}", id, limit);
                    return Err(DiscoveryError::ConnectionFailed(format!(
                        "connect timed out after {} ms",
                        limit.as_millis()
                    )));
                }
            },
            None => attempt.await,
        };

        match outcome {
            Ok(()) => {
                info!("Connected to {}", id);
                Ok(ConnectionStatus {
                    status: ConnectState::Connected,
                    id: id.to_string(),
                })
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", id, e);
                Err(DiscoveryError::ConnectionFailed(e.to_string()))
            }
        }
    }
}
