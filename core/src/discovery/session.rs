//! Scan session controller
//!
//! Owns the `Idle -> Scanning -> Idle` state machine and the device registry.
//! One task consumes the radio event stream for the lifetime of the process;
//! each scan request runs its window in its own task and hands the snapshot
//! back over a oneshot, so a caller that goes away cannot strand the
//! controller in `Scanning`.

use super::device::Device;
use super::registry::DeviceRegistry;
use crate::radio::{Radio, RadioError, RadioEvent, RadioState};
use crate::DiscoveryError;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default listening window for one scan session
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Capacity of the scan event broadcast channel
const SCAN_EVENT_CAPACITY: usize = 256;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Discovery timing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// How long a session listens before it is closed
    pub scan_window: Duration,
    /// Ceiling on a single connect attempt. `None` leaves timing to the radio.
    pub connect_timeout: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_window: DEFAULT_SCAN_WINDOW,
            connect_timeout: None,
        }
    }
}

impl ScanConfig {
    /// Create a configuration with the given window
    pub fn new(scan_window: Duration) -> Result<Self, DiscoveryError> {
        let config = Self {
            scan_window,
            connect_timeout: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the connect ceiling
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.scan_window.is_zero() {
            return Err(DiscoveryError::InvalidInput(
                "scan window must be > 0".to_string(),
            ));
        }
        if self.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(DiscoveryError::InvalidInput(
                "connect timeout must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session running
    Idle,
    /// A session window is open
    Scanning,
}

/// Lifecycle notifications published by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    RadioStateChanged {
        state: RadioState,
    },
    SessionStarted {
        session_id: u64,
        window_ms: u64,
    },
    DeviceFound {
        session_id: u64,
        device: Device,
    },
    SessionCompleted {
        session_id: u64,
        device_count: usize,
    },
}

struct ControllerState {
    phase: SessionPhase,
    session_id: u64,
    radio_state: RadioState,
    registry: DeviceRegistry,
    session_task: Option<JoinHandle<()>>,
}

type SharedState = Arc<Mutex<ControllerState>>;

// ============================================================================
// CONTROLLER
// ============================================================================

/// Serializes scan sessions against one radio
pub struct ScanController<R: Radio> {
    radio: Arc<R>,
    config: ScanConfig,
    state: SharedState,
    events_tx: broadcast::Sender<ScanEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl<R: Radio> ScanController<R> {
    /// Create a controller. Call [`ScanController::attach`] before scanning so
    /// the controller learns the radio state and receives advertisements.
    pub fn new(radio: Arc<R>, config: ScanConfig) -> Result<Self, DiscoveryError> {
        config.validate()?;

        let (events_tx, _) = broadcast::channel(SCAN_EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            radio,
            config,
            state: Arc::new(Mutex::new(ControllerState {
                phase: SessionPhase::Idle,
                session_id: 0,
                radio_state: RadioState::Unknown,
                registry: DeviceRegistry::new(),
                session_task: None,
            })),
            events_tx,
            shutdown_tx,
        })
    }

    /// Seed the radio state and start consuming the radio event stream.
    ///
    /// The returned task runs until [`ScanController::shutdown`] is called or
    /// the radio closes its stream.
    pub async fn attach(&self) -> Result<JoinHandle<()>, RadioError> {
        match self.radio.power_state().await {
            Ok(radio_state) => {
                self.state.lock().radio_state = radio_state;
                info!("Radio state: {}", radio_state);
            }
            Err(e) => warn!("Could not read radio state, waiting for events: {}", e),
        }

        let mut events = self.radio.events().await?;
        let state = self.state.clone();
        let events_tx = self.events_tx.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => {
                        debug!("Radio event loop stopping");
                        break;
                    }
                    next = events.next() => match next {
                        Some(event) => apply_event(&state, &events_tx, event),
                        None => {
                            warn!("Radio event stream closed");
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Process one radio event synchronously
    pub fn handle_event(&self, event: RadioEvent) {
        apply_event(&self.state, &self.events_tx, event);
    }

    /// Run one scan session and return the devices found during its window.
    ///
    /// Fails with `RadioUnavailable` unless the radio is powered on, and with
    /// `Busy` while another session is running. Neither failure touches the
    /// registry or the running session.
    pub async fn begin_scan(&self) -> Result<Vec<Device>, DiscoveryError> {
        if *self.shutdown_tx.borrow() {
            return Err(DiscoveryError::RadioUnavailable(
                "scan controller is shutting down".to_string(),
            ));
        }

        let (result_tx, result_rx) = oneshot::channel();
        let session_id = {
            let mut state = self.state.lock();
            if !state.radio_state.is_powered_on() {
                return Err(DiscoveryError::RadioUnavailable(format!(
                    "radio is {}",
                    state.radio_state
                )));
            }
            if state.phase == SessionPhase::Scanning {
                return Err(DiscoveryError::Busy {
                    session_id: state.session_id,
                });
            }
            state.session_id += 1;
            state.phase = SessionPhase::Scanning;
            state.registry.reset();

            let session = Session {
                id: state.session_id,
                window: self.config.scan_window,
                radio: self.radio.clone(),
                state: self.state.clone(),
                events_tx: self.events_tx.clone(),
                shutdown: self.shutdown_tx.subscribe(),
            };
            // stored handle always belongs to the session owning Scanning
            state.session_task = Some(tokio::spawn(async move {
                let result = session.run().await;
                let _ = result_tx.send(result);
            }));
            state.session_id
        };

        result_rx.await.map_err(|_| {
            DiscoveryError::RadioUnavailable(format!("scan session {} was aborted", session_id))
        })?
    }

    /// Close any open window early, stop scanning and end the event loop.
    /// Waits for the in-flight session to finish its cleanup.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let in_flight = self.state.lock().session_task.take();
        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                warn!("Scan session task failed during shutdown: {}", e);
            }
        }
    }

    /// Subscribe to lifecycle notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events_tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    /// Last known radio power state
    pub fn radio_state(&self) -> RadioState {
        self.state.lock().radio_state
    }

    /// Identifier of the most recent session, 0 before the first one
    pub fn current_session(&self) -> u64 {
        self.state.lock().session_id
    }

    /// Devices recorded in the current (or most recent) session
    pub fn device_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn radio(&self) -> &Arc<R> {
        &self.radio
    }
}

// ============================================================================
// SESSION TASK
// ============================================================================

struct Session<R: Radio> {
    id: u64,
    window: Duration,
    radio: Arc<R>,
    state: SharedState,
    events_tx: broadcast::Sender<ScanEvent>,
    shutdown: watch::Receiver<bool>,
}

impl<R: Radio> Session<R> {
    async fn run(mut self) -> Result<Vec<Device>, DiscoveryError> {
        // Announced before the radio starts so no DeviceFound of this session
        // can precede it.
        let _ = self.events_tx.send(ScanEvent::SessionStarted {
            session_id: self.id,
            window_ms: self.window.as_millis() as u64,
        });

        if let Err(e) = self.radio.start_scanning(&[], true).await {
            self.state.lock().phase = SessionPhase::Idle;
            warn!("Scan session {} could not start: {}", self.id, e);
            let _ = self.events_tx.send(ScanEvent::SessionCompleted {
                session_id: self.id,
                device_count: 0,
            });
            return Err(DiscoveryError::RadioUnavailable(format!(
                "failed to start scanning: {}",
                e
            )));
        }

        info!(
            "Scan session {} started ({} ms window)",
            self.id,
            self.window.as_millis()
        );

        tokio::select! {
            _ = tokio::time::sleep(self.window) => {}
            _ = wait_for_shutdown(&mut self.shutdown) => {
                info!("Scan session {} closed early by shutdown", self.id);
            }
        }

        if let Err(e) = self.radio.stop_scanning().await {
            warn!("Failed to stop scanning after session {}: {}", self.id, e);
        }

        let snapshot = {
            let mut state = self.state.lock();
            state.phase = SessionPhase::Idle;
            state.registry.snapshot()
        };

        info!(
            "Scan session {} complete - {} devices found",
            self.id,
            snapshot.len()
        );
        let _ = self.events_tx.send(ScanEvent::SessionCompleted {
            session_id: self.id,
            device_count: snapshot.len(),
        });

        Ok(snapshot)
    }
}

// ============================================================================
// EVENT PROCESSING
// ============================================================================

fn apply_event(state: &SharedState, events_tx: &broadcast::Sender<ScanEvent>, event: RadioEvent) {
    match event {
        RadioEvent::StateChanged(radio_state) => {
            let scanning = {
                let mut state = state.lock();
                state.radio_state = radio_state;
                state.phase == SessionPhase::Scanning
            };
            info!("Radio state: {}", radio_state);
            if scanning && !radio_state.is_powered_on() {
                warn!("Radio left poweredOn during an open scan window");
            }
            let _ = events_tx.send(ScanEvent::RadioStateChanged { state: radio_state });
        }
        RadioEvent::Discovered(advertisement) => {
            if advertisement.id.is_empty() {
                warn!("Dropping advertisement without a peripheral id");
                return;
            }

            let device = Device::from_event(&advertisement);
            let session_id = {
                let mut state = state.lock();
                if state.phase != SessionPhase::Scanning {
                    return;
                }
                if !state.registry.upsert_if_absent(device.clone()) {
                    return;
                }
                state.session_id
            };

            debug!(
                "Found device {} ({}, rssi {})",
                device.id, device.display_name, device.signal_strength
            );
            let _ = events_tx.send(ScanEvent::DeviceFound { session_id, device });
        }
    }
}

/// Resolves once shutdown is requested. Never resolves if the controller is
/// dropped without a shutdown.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{DiscoveryEvent, MockRadio};

    fn controller(radio: MockRadio) -> ScanController<MockRadio> {
        let config = ScanConfig::new(Duration::from_millis(50)).expect("Valid config");
        ScanController::new(Arc::new(radio), config).expect("Controller creation")
    }

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();
        assert_eq!(config.scan_window, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scan_config_zero_window() {
        assert!(ScanConfig::new(Duration::ZERO).is_err());
    }

    #[test]
    fn test_scan_config_zero_connect_timeout() {
        let config = ScanConfig::default().with_connect_timeout(Some(Duration::ZERO));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_new_controller_is_idle() {
        let controller = controller(MockRadio::powered_on());
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert_eq!(controller.radio_state(), RadioState::Unknown);
        assert_eq!(controller.current_session(), 0);
    }

    #[test]
    fn test_state_change_event_updates_radio_state() {
        let controller = controller(MockRadio::powered_on());
        controller.handle_event(RadioEvent::StateChanged(RadioState::PoweredOff));
        assert_eq!(controller.radio_state(), RadioState::PoweredOff);
    }

    #[test]
    fn test_advertisements_ignored_while_idle() {
        let controller = controller(MockRadio::powered_on());
        let mut events = controller.subscribe();
        controller.handle_event(RadioEvent::Discovered(DiscoveryEvent::new("a", -40)));
        assert!(controller.state.lock().registry.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scan_without_power() {
        let radio = MockRadio::new(RadioState::PoweredOff);
        let controller = controller(radio);
        controller.attach().await.expect("Attach");

        let result = controller.begin_scan().await;
        assert!(matches!(result, Err(DiscoveryError::RadioUnavailable(_))));
        assert_eq!(controller.radio().start_calls(), 0);
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_scan_requests_all_services_with_duplicates() {
        let controller = controller(MockRadio::powered_on());
        controller.attach().await.expect("Attach");

        let devices = controller.begin_scan().await.expect("Scan");
        assert!(devices.is_empty());
        assert_eq!(controller.radio().last_scan_request(), Some((vec![], true)));
        assert_eq!(controller.radio().stop_calls(), 1);
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert_eq!(controller.current_session(), 1);
    }

    #[tokio::test]
    async fn test_start_failure_returns_to_idle() {
        let radio = MockRadio::powered_on();
        radio.fail_start("adapter gone");
        let controller = controller(radio);
        controller.attach().await.expect("Attach");

        let result = controller.begin_scan().await;
        match result {
            Err(DiscoveryError::RadioUnavailable(detail)) => {
                assert!(detail.contains("adapter gone"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_failed_start_still_completes_session_events() {
        let radio = MockRadio::powered_on();
        radio.fail_start("adapter gone");
        let controller = controller(radio);
        controller.attach().await.expect("Attach");
        let mut events = controller.subscribe();

        assert!(controller.begin_scan().await.is_err());

        assert!(matches!(
            events.try_recv(),
            Ok(ScanEvent::SessionStarted { session_id: 1, .. })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(ScanEvent::SessionCompleted {
                session_id: 1,
                device_count: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_session_events_are_published() {
        let radio = MockRadio::powered_on();
        radio.script_advertisements(vec![DiscoveryEvent::new("a", -40)]);
        let controller = controller(radio);
        controller.attach().await.expect("Attach");
        let mut events = controller.subscribe();

        let devices = controller.begin_scan().await.expect("Scan");
        assert_eq!(devices.len(), 1);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let started = seen
            .iter()
            .position(|e| matches!(e, ScanEvent::SessionStarted { session_id: 1, .. }))
            .expect("SessionStarted");
        let found = seen
            .iter()
            .position(|e| matches!(e, ScanEvent::DeviceFound { device, .. } if device.id == "a"))
            .expect("DeviceFound");
        assert!(started < found);
        assert!(matches!(
            seen.last(),
            Some(ScanEvent::SessionCompleted {
                session_id: 1,
                device_count: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_scan_after_shutdown_is_rejected() {
        let controller = controller(MockRadio::powered_on());
        controller.attach().await.expect("Attach");
        controller.shutdown().await;

        let result = controller.begin_scan().await;
        assert!(matches!(result, Err(DiscoveryError::RadioUnavailable(_))));
    }

    #[test]
    fn test_scan_event_serialization() {
        let event = ScanEvent::SessionCompleted {
            session_id: 4,
            device_count: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_completed");
        assert_eq!(json["session_id"], 4);
    }
}
