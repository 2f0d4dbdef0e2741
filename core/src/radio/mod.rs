//! Radio capability interface
//!
//! The discovery core never talks to a Bluetooth stack directly. It drives an
//! implementation of [`Radio`] and consumes the events it emits. The CLI wires
//! in a btleplug-backed radio; tests use [`mock::MockRadio`].

pub mod mock;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use mock::{MockPeripheral, MockRadio};

/// Errors reported by a radio implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RadioError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,
    #[error("Event stream unavailable: {0}")]
    EventStreamUnavailable(String),
    #[error("Peripheral disconnected: {0}")]
    Disconnected(String),
    #[error("Radio backend error: {0}")]
    Backend(String),
}

/// Power state of the radio, named after the states the host stack reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    pub fn is_powered_on(&self) -> bool {
        *self == RadioState::PoweredOn
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioState::Unknown => write!(f, "unknown"),
            RadioState::Resetting => write!(f, "resetting"),
            RadioState::Unsupported => write!(f, "unsupported"),
            RadioState::Unauthorized => write!(f, "unauthorized"),
            RadioState::PoweredOff => write!(f, "poweredOff"),
            RadioState::PoweredOn => write!(f, "poweredOn"),
        }
    }
}

/// One received advertisement, as reported by the radio layer.
///
/// Duplicates are expected: with duplicate reporting enabled the radio emits
/// one event per advertisement it hears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    /// Radio-assigned peripheral identifier
    pub id: String,
    /// Advertised local name
    pub display_name: Option<String>,
    /// RSSI in dBm
    pub signal_strength: i16,
    pub connectable: bool,
    pub service_identifiers: Vec<String>,
    /// Raw manufacturer-specific data, company identifier included
    pub manufacturer_payload: Option<Vec<u8>>,
}

impl DiscoveryEvent {
    /// Minimal event with no name, services or payload
    pub fn new(id: impl Into<String>, signal_strength: i16) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            signal_strength,
            connectable: true,
            service_identifiers: Vec::new(),
            manufacturer_payload: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.manufacturer_payload = Some(payload);
        self
    }

    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.service_identifiers = services;
        self
    }

    pub fn with_connectable(mut self, connectable: bool) -> Self {
        self.connectable = connectable;
        self
    }
}

/// Events from the radio layer to the discovery core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// An advertisement was received
    Discovered(DiscoveryEvent),
    /// The adapter changed power state
    StateChanged(RadioState),
}

/// Capability interface the discovery core drives.
///
/// Implementations keep their own peripheral cache: every peripheral they
/// have reported through [`RadioEvent::Discovered`] must stay resolvable
/// through [`Radio::peripheral`] for as long as the underlying stack keeps it.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Handle to a cached peripheral
    type Peripheral: Send + Sync;

    /// Current power state, used to seed the controller before the first
    /// state-change event arrives
    async fn power_state(&self) -> Result<RadioState, RadioError>;

    /// Subscribe to the event stream. Called once for the process lifetime.
    async fn events(&self) -> Result<BoxStream<'static, RadioEvent>, RadioError>;

    /// Start scanning. An empty filter means all services.
    async fn start_scanning(
        &self,
        service_filter: &[String],
        allow_duplicates: bool,
    ) -> Result<(), RadioError>;

    async fn stop_scanning(&self) -> Result<(), RadioError>;

    /// Look up a previously discovered peripheral
    async fn peripheral(&self, id: &str) -> Result<Option<Self::Peripheral>, RadioError>;

    /// Connect to a peripheral, resolving once the link is up or has failed
    async fn connect(&self, peripheral: &Self::Peripheral) -> Result<(), RadioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_state_display_matches_host_names() {
        assert_eq!(RadioState::PoweredOn.to_string(), "poweredOn");
        assert_eq!(RadioState::PoweredOff.to_string(), "poweredOff");
        assert_eq!(RadioState::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_radio_state_serialization() {
        let json = serde_json::to_string(&RadioState::PoweredOn).unwrap();
        assert_eq!(json, "\"poweredOn\"");
        let state: RadioState = serde_json::from_str("\"unauthorized\"").unwrap();
        assert_eq!(state, RadioState::Unauthorized);
    }

    #[test]
    fn test_only_powered_on_counts() {
        assert!(RadioState::PoweredOn.is_powered_on());
        assert!(!RadioState::Resetting.is_powered_on());
        assert!(!RadioState::PoweredOff.is_powered_on());
    }

    #[test]
    fn test_discovery_event_builder() {
        let event = DiscoveryEvent::new("aa", -40)
            .with_name("Speaker")
            .with_payload(vec![1, 2, 3])
            .with_connectable(false);
        assert_eq!(event.id, "aa");
        assert_eq!(event.display_name.as_deref(), Some("Speaker"));
        assert_eq!(event.manufacturer_payload, Some(vec![1, 2, 3]));
        assert!(!event.connectable);
    }
}
