// btleplug-backed radio
//
// Maps btleplug central events onto the core's discovery events. The host
// stack owns the peripheral cache; lookups go straight to the adapter.

use async_trait::async_trait;
use blueprobe_core::{DiscoveryEvent, Radio, RadioError, RadioEvent, RadioState};
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

fn backend(e: btleplug::Error) -> RadioError {
    match e {
        btleplug::Error::NotConnected => RadioError::Disconnected(e.to_string()),
        other => RadioError::Backend(other.to_string()),
    }
}

/// Radio driving one host Bluetooth adapter
pub struct BtleRadio {
    _manager: Manager,
    adapter: Adapter,
}

impl BtleRadio {
    /// Open the adapter at `index` in the host's adapter list
    pub async fn open(index: usize) -> Result<Self, RadioError> {
        let manager = Manager::new().await.map_err(backend)?;
        let adapters = manager.adapters().await.map_err(backend)?;
        let adapter = adapters
            .into_iter()
            .nth(index)
            .ok_or(RadioError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter {}", info),
            Err(e) => warn!("Could not read adapter info: {}", e),
        }

        Ok(Self {
            _manager: manager,
            adapter,
        })
    }
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

/// Manufacturer data as it appeared on air: company identifier (little
/// endian) followed by the vendor bytes. Picks the lowest company id when a
/// peripheral advertises several.
fn raw_manufacturer_payload(props: &PeripheralProperties) -> Option<Vec<u8>> {
    let (company, data) = props
        .manufacturer_data
        .iter()
        .min_by_key(|(company, _)| **company)?;

    let mut raw = Vec::with_capacity(2 + data.len());
    raw.extend_from_slice(&company.to_le_bytes());
    raw.extend_from_slice(data);
    Some(raw)
}

fn discovery_event(id: &PeripheralId, props: PeripheralProperties) -> Option<DiscoveryEvent> {
    // Peripherals restored from the host cache have no RSSI until heard again
    let rssi = props.rssi?;
    let manufacturer_payload = raw_manufacturer_payload(&props);

    Some(DiscoveryEvent {
        id: id.to_string(),
        display_name: props.local_name,
        signal_strength: rssi,
        // btleplug does not expose the advertising PDU type
        connectable: true,
        service_identifiers: props.services.iter().map(|u| u.to_string()).collect(),
        manufacturer_payload,
    })
}

async fn translate(adapter: Adapter, event: CentralEvent) -> Option<RadioEvent> {
    let id = match event {
        CentralEvent::StateUpdate(state) => {
            return Some(RadioEvent::StateChanged(radio_state(state)));
        }
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => id,
        _ => return None,
    };

    let peripheral = match adapter.peripheral(&id).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            warn!("Advertisement from unknown peripheral {}: {}", id, e);
            return None;
        }
    };

    match peripheral.properties().await {
        Ok(Some(props)) => {
            let event = discovery_event(&id, props);
            if event.is_none() {
                debug!("Skipping {} without RSSI", id);
            }
            event.map(RadioEvent::Discovered)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read properties of {}: {}", id, e);
            None
        }
    }
}

#[async_trait]
impl Radio for BtleRadio {
    type Peripheral = Peripheral;

    async fn power_state(&self) -> Result<RadioState, RadioError> {
        let state = self.adapter.adapter_state().await.map_err(backend)?;
        Ok(radio_state(state))
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent>, RadioError> {
        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| RadioError::EventStreamUnavailable(e.to_string()))?;
        let adapter = self.adapter.clone();

        Ok(events
            .filter_map(move |event| translate(adapter.clone(), event))
            .boxed())
    }

    async fn start_scanning(
        &self,
        service_filter: &[String],
        allow_duplicates: bool,
    ) -> Result<(), RadioError> {
        let services = service_filter
            .iter()
            .map(|s| {
                Uuid::parse_str(s)
                    .map_err(|e| RadioError::Backend(format!("invalid service uuid {}: {}", s, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // btleplug reports every property update; duplicates are filtered by
        // the registry, so there is nothing to switch off here
        debug!(
            "Starting scan ({} service filters, duplicates {})",
            services.len(),
            allow_duplicates
        );
        self.adapter
            .start_scan(ScanFilter { services })
            .await
            .map_err(backend)
    }

    async fn stop_scanning(&self) -> Result<(), RadioError> {
        self.adapter.stop_scan().await.map_err(backend)
    }

    async fn peripheral(&self, id: &str) -> Result<Option<Peripheral>, RadioError> {
        let peripherals = self.adapter.peripherals().await.map_err(backend)?;
        Ok(peripherals.into_iter().find(|p| p.id().to_string() == id))
    }

    async fn connect(&self, peripheral: &Peripheral) -> Result<(), RadioError> {
        peripheral.connect().await.map_err(backend)
    }
}
