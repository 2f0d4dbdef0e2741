//! Discovered device record

use super::address::derive_address;
use crate::radio::DiscoveryEvent;
use serde::{Deserialize, Serialize};

/// Name reported for peripherals that do not advertise one
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// A peripheral seen during one scan session.
///
/// Built from the first advertisement received for its `id`; later
/// advertisements from the same peripheral do not update it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub display_name: String,
    pub signal_strength: i16,
    pub connectable: bool,
    pub service_identifiers: Vec<String>,
    /// Raw manufacturer data, lowercase hex
    pub manufacturer_payload: Option<String>,
    /// Best-effort address guessed from the payload tail. Not authoritative.
    pub derived_address: Option<String>,
}

impl Device {
    /// Build a device from an advertisement
    pub fn from_event(event: &DiscoveryEvent) -> Self {
        let display_name = event
            .display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_DEVICE_NAME)
            .to_string();

        let mut service_identifiers: Vec<String> = Vec::with_capacity(event.service_identifiers.len());
        for service in &event.service_identifiers {
            if !service_identifiers.contains(service) {
                service_identifiers.push(service.clone());
            }
        }

        let payload = event.manufacturer_payload.as_deref();

        Self {
            id: event.id.clone(),
            display_name,
            signal_strength: event.signal_strength,
            connectable: event.connectable,
            service_identifiers,
            manufacturer_payload: payload.map(hex::encode),
            derived_address: derive_address(payload),
        }
    }

    /// Whether the peripheral advertised a name
    pub fn is_named(&self) -> bool {
        self.display_name != UNKNOWN_DEVICE_NAME
    }
}
