use blueprobe_core::{
    DiscoveryError, DiscoveryEvent, RadioState, ScanConfig, ScanController, SessionPhase,
};
use blueprobe_core::radio::MockRadio;
use std::sync::Arc;
use std::time::Duration;

const WINDOW: Duration = Duration::from_millis(150);

async fn attached(radio: Arc<MockRadio>) -> Arc<ScanController<MockRadio>> {
    let config = ScanConfig::new(WINDOW).unwrap();
    let controller = ScanController::new(radio, config).unwrap();
    controller.attach().await.unwrap();
    Arc::new(controller)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn ids(devices: &[blueprobe_core::Device]) -> Vec<&str> {
    devices.iter().map(|d| d.id.as_str()).collect()
}

#[tokio::test]
async fn test_duplicates_keep_first_advertisement_in_order() {
    let radio = Arc::new(MockRadio::powered_on());
    radio.script_advertisements(vec![
        DiscoveryEvent::new("b", -40).with_name("Beacon"),
        DiscoveryEvent::new("a", -70),
        DiscoveryEvent::new("b", -20).with_name("Renamed"),
        DiscoveryEvent::new("c", -55).with_payload(vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]),
        DiscoveryEvent::new("a", -10).with_name("Late name"),
    ]);
    let controller = attached(radio.clone()).await;

    let devices = controller.begin_scan().await.expect("Scan");

    assert_eq!(ids(&devices), vec!["b", "a", "c"]);
    assert_eq!(devices[0].display_name, "Beacon");
    assert_eq!(devices[0].signal_strength, -40);
    assert_eq!(devices[1].display_name, "Unknown");
    assert_eq!(devices[1].signal_strength, -70);
    assert_eq!(devices[2].derived_address.as_deref(), Some("33:44:55:66:77:88"));
    assert_eq!(radio.stop_calls(), 1);
    assert!(!radio.is_scanning());
}

#[tokio::test]
async fn test_empty_window_is_a_valid_result() {
    let radio = Arc::new(MockRadio::powered_on());
    let controller = attached(radio).await;

    let devices = controller.begin_scan().await.expect("Scan");
    assert!(devices.is_empty());
    assert_eq!(controller.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_overlapping_scan_is_busy() {
    let radio = Arc::new(MockRadio::powered_on());
    radio.script_advertisements(vec![
        DiscoveryEvent::new("first", -50),
        DiscoveryEvent::new("second", -60),
    ]);
    let controller = attached(radio.clone()).await;

    let running = tokio::spawn({
        let controller = controller.clone();
        async move { controller.begin_scan().await }
    });
    wait_until(|| controller.device_count() == 2).await;

    let rejected = controller.begin_scan().await;
    assert_eq!(rejected, Err(DiscoveryError::Busy { session_id: 1 }));
    assert_eq!(controller.phase(), SessionPhase::Scanning);

    radio.advertise(DiscoveryEvent::new("third", -70));

    let devices = running.await.unwrap().expect("First scan");
    assert_eq!(ids(&devices), vec!["first", "second", "third"]);
    assert_eq!(radio.start_calls(), 1);
    assert_eq!(radio.stop_calls(), 1);
}

#[tokio::test]
async fn test_powered_off_scan_keeps_previous_devices() {
    let radio = Arc::new(MockRadio::powered_on());
    radio.script_advertisements(vec![DiscoveryEvent::new("kept", -50)]);
    let controller = attached(radio.clone()).await;

    let devices = controller.begin_scan().await.expect("Scan");
    assert_eq!(devices.len(), 1);

    radio.set_power_state(RadioState::PoweredOff);
    wait_until(|| controller.radio_state() == RadioState::PoweredOff).await;

    let result = controller.begin_scan().await;
    assert!(matches!(result, Err(DiscoveryError::RadioUnavailable(_))));
    assert_eq!(controller.device_count(), 1);
    assert_eq!(radio.start_calls(), 1);
}

#[tokio::test]
async fn test_power_on_event_enables_scanning() {
    let radio = Arc::new(MockRadio::new(RadioState::PoweredOff));
    let controller = attached(radio.clone()).await;

    assert!(controller.begin_scan().await.is_err());

    radio.set_power_state(RadioState::PoweredOn);
    wait_until(|| controller.radio_state() == RadioState::PoweredOn).await;

    assert!(controller.begin_scan().await.is_ok());
}

#[tokio::test]
async fn test_each_session_starts_from_an_empty_registry() {
    let radio = Arc::new(MockRadio::powered_on());
    radio.script_advertisements(vec![DiscoveryEvent::new("old", -50)]);
    let controller = attached(radio.clone()).await;

    let first = controller.begin_scan().await.expect("First scan");
    assert_eq!(ids(&first), vec!["old"]);

    radio.script_advertisements(vec![DiscoveryEvent::new("new", -50)]);
    let second = controller.begin_scan().await.expect("Second scan");
    assert_eq!(ids(&second), vec!["new"]);

    // earlier snapshots are detached copies
    assert_eq!(ids(&first), vec!["old"]);
    assert_eq!(controller.current_session(), 2);
}

#[tokio::test]
async fn test_advertisements_after_window_are_ignored() {
    let radio = Arc::new(MockRadio::powered_on());
    let controller = attached(radio.clone()).await;

    let devices = controller.begin_scan().await.expect("Scan");
    assert!(devices.is_empty());

    radio.advertise(DiscoveryEvent::new("late", -40));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(controller.device_count(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_window_and_stops_radio() {
    let radio = Arc::new(MockRadio::powered_on());
    radio.script_advertisements(vec![DiscoveryEvent::new("partial", -50)]);
    let config = ScanConfig::new(Duration::from_secs(30)).unwrap();
    let controller = Arc::new(ScanController::new(radio.clone(), config).unwrap());
    controller.attach().await.unwrap();

    let running = tokio::spawn({
        let controller = controller.clone();
        async move { controller.begin_scan().await }
    });
    wait_until(|| controller.device_count() == 1).await;

    controller.shutdown().await;

    let devices = running.await.unwrap().expect("Scan");
    assert_eq!(ids(&devices), vec!["partial"]);
    assert_eq!(radio.stop_calls(), 1);
    assert_eq!(controller.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_dropped_caller_does_not_strand_session() {
    let radio = Arc::new(MockRadio::powered_on());
    let controller = attached(radio.clone()).await;

    let abandoned = tokio::spawn({
        let controller = controller.clone();
        async move { controller.begin_scan().await }
    });
    wait_until(|| controller.phase() == SessionPhase::Scanning).await;
    abandoned.abort();

    wait_until(|| controller.phase() == SessionPhase::Idle).await;
    assert_eq!(radio.stop_calls(), 1);
    assert!(controller.begin_scan().await.is_ok());
}

#[tokio::test]
async fn test_malformed_advertisement_does_not_stop_discovery() {
    let radio = Arc::new(MockRadio::powered_on());
    radio.script_advertisements(vec![
        DiscoveryEvent::new("a", -40),
        DiscoveryEvent::new("", -40),
        DiscoveryEvent::new("b", -60),
    ]);
    let controller = attached(radio.clone()).await;

    let devices = controller.begin_scan().await.expect("Scan");
    assert_eq!(ids(&devices), vec!["a", "b"]);

    // the event loop is still consuming after the bad advertisement
    radio.script_advertisements(vec![DiscoveryEvent::new("c", -50)]);
    let devices = controller.begin_scan().await.expect("Second scan");
    assert_eq!(ids(&devices), vec!["c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_session_after_failed_start() {
    let radio = Arc::new(MockRadio::powered_on());
    let config = ScanConfig::new(Duration::from_secs(30)).unwrap();
    let controller = Arc::new(ScanController::new(radio.clone(), config).unwrap());
    controller.attach().await.unwrap();

    radio.fail_start("adapter busy");
    assert!(matches!(
        controller.begin_scan().await,
        Err(DiscoveryError::RadioUnavailable(_))
    ));
    radio.allow_start();

    let running = tokio::spawn({
        let controller = controller.clone();
        async move { controller.begin_scan().await }
    });
    wait_until(|| radio.is_scanning()).await;

    controller.shutdown().await;

    // shutdown returned only after the live session stopped the radio
    assert!(!radio.is_scanning());
    assert_eq!(radio.stop_calls(), 1);
    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert!(running.await.unwrap().is_ok());
}
