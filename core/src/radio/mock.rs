//! In-memory radio for tests and dry runs.
//!
//! Advertisements can be scripted ahead of time and are emitted when scanning
//! starts, or pushed at any moment with [`MockRadio::advertise`]. Every
//! advertised peripheral lands in the mock's peripheral cache, which outlives
//! scan sessions the same way a host stack's cache does.

use super::{DiscoveryEvent, Radio, RadioError, RadioEvent, RadioState};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Cached peripheral handle returned by [`MockRadio::peripheral`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPeripheral {
    pub id: String,
}

#[derive(Debug)]
struct MockState {
    power: RadioState,
    scanning: bool,
    scripted: Vec<DiscoveryEvent>,
    cache: HashMap<String, MockPeripheral>,
    connect_failures: HashMap<String, String>,
    connect_delay: Option<Duration>,
    start_failure: Option<String>,
    start_calls: usize,
    stop_calls: usize,
    last_scan_request: Option<(Vec<String>, bool)>,
    connected: Vec<String>,
}

/// Scriptable radio backend
pub struct MockRadio {
    state: Mutex<MockState>,
    events_tx: mpsc::UnboundedSender<RadioEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<RadioEvent>>>,
}

impl MockRadio {
    /// Create a mock radio reporting the given power state
    pub fn new(power: RadioState) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded();
        Self {
            state: Mutex::new(MockState {
                power,
                scanning: false,
                scripted: Vec::new(),
                cache: HashMap::new(),
                connect_failures: HashMap::new(),
                connect_delay: None,
                start_failure: None,
                start_calls: 0,
                stop_calls: 0,
                last_scan_request: None,
                connected: Vec::new(),
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Mock radio that is already powered on
    pub fn powered_on() -> Self {
        Self::new(RadioState::PoweredOn)
    }

    /// Queue advertisements to emit the next time scanning starts
    pub fn script_advertisements(&self, events: Vec<DiscoveryEvent>) {
        self.state.lock().scripted.extend(events);
    }

    /// Emit one advertisement immediately
    pub fn advertise(&self, event: DiscoveryEvent) {
        self.state.lock().cache.insert(
            event.id.clone(),
            MockPeripheral {
                id: event.id.clone(),
            },
        );
        let _ = self.events_tx.unbounded_send(RadioEvent::Discovered(event));
    }

    /// Change the power state and emit the matching state-change event
    pub fn set_power_state(&self, power: RadioState) {
        self.state.lock().power = power;
        let _ = self.events_tx.unbounded_send(RadioEvent::StateChanged(power));
    }

    /// Put a peripheral in the cache without emitting an event, as if it was
    /// seen by an earlier process
    pub fn remember_peripheral(&self, id: impl Into<String>) {
        let id = id.into();
        self.state
            .lock()
            .cache
            .insert(id.clone(), MockPeripheral { id });
    }

    /// Make connects to `id` fail with `message`
    pub fn fail_connect(&self, id: impl Into<String>, message: impl Into<String>) {
        self.state
            .lock()
            .connect_failures
            .insert(id.into(), message.into());
    }

    /// Delay every connect attempt
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Make the next `start_scanning` calls fail
    pub fn fail_start(&self, message: impl Into<String>) {
        self.state.lock().start_failure = Some(message.into());
    }

    /// Let `start_scanning` succeed again
    pub fn allow_start(&self) {
        self.state.lock().start_failure = None;
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    /// Filter and duplicate flag of the most recent `start_scanning` call
    pub fn last_scan_request(&self) -> Option<(Vec<String>, bool)> {
        self.state.lock().last_scan_request.clone()
    }

    /// Identifiers connected so far, in order
    pub fn connected(&self) -> Vec<String> {
        self.state.lock().connected.clone()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::powered_on()
    }
}

#[async_trait]
impl Radio for MockRadio {
    type Peripheral = MockPeripheral;

    async fn power_state(&self) -> Result<RadioState, RadioError> {
        Ok(self.state.lock().power)
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent>, RadioError> {
        self.events_rx
            .lock()
            .take()
            .map(|rx| rx.boxed())
            .ok_or_else(|| {
                RadioError::EventStreamUnavailable("already subscribed".to_string())
            })
    }

    async fn start_scanning(
        &self,
        service_filter: &[String],
        allow_duplicates: bool,
    ) -> Result<(), RadioError> {
        let scripted = {
            let mut state = self.state.lock();
            state.start_calls += 1;
            if let Some(message) = state.start_failure.clone() {
                return Err(RadioError::Backend(message));
            }
            state.scanning = true;
            state.last_scan_request = Some((service_filter.to_vec(), allow_duplicates));
            std::mem::take(&mut state.scripted)
        };

        for event in scripted {
            self.advertise(event);
        }
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<(), RadioError> {
        let mut state = self.state.lock();
        state.stop_calls += 1;
        state.scanning = false;
        Ok(())
    }

    async fn peripheral(&self, id: &str) -> Result<Option<MockPeripheral>, RadioError> {
        Ok(self.state.lock().cache.get(id).cloned())
    }

    async fn connect(&self, peripheral: &MockPeripheral) -> Result<(), RadioError> {
        let delay = self.state.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(message) = state.connect_failures.get(&peripheral.id) {
            return Err(RadioError::Backend(message.clone()));
        }
        state.connected.push(peripheral.id.clone());
        Ok(())
    }
}
