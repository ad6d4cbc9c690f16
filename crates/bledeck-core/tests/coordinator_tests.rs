//! 协调器集成测试
//!
//! 使用 `tests/common` 中的协作方，覆盖扫描窗口、合并、配对和持久化。

mod common;

use bledeck_core::store::{DEVICES_KEY, devices};
use bledeck_core::{
    AdapterState, CoordinatorError, DeviceRecord, DeviceStatus, MemoryStore, ScanCallback,
    Severity, WindowOutcome,
};
use common::{FakeBle, FlakyStore, drain, harness, sensor};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn stored(store: &MemoryStore) -> Vec<DeviceRecord> {
    devices::decode(&store.raw(DEVICES_KEY).expect("snapshot written")).unwrap()
}

#[tokio::test]
async fn test_merge_keeps_status_across_scans() {
    let ble = FakeBle::powered_on();
    let (coordinator, _notices) = harness(ble, Arc::new(MemoryStore::new()));
    let registry = coordinator.registry();

    registry.merge(sensor("A", "Sensor1"));
    registry.set_status("A", DeviceStatus::Connected);
    registry.merge(sensor("A", "Sensor1").with_rssi(-48));

    let record = registry.get("A").unwrap();
    assert_eq!(record.status, DeviceStatus::Connected);
    assert_eq!(record.rssi, Some(-48));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_unnamed_device_listed_once_named() {
    let ble = FakeBle::powered_on();
    let (coordinator, _notices) = harness(ble, Arc::new(MemoryStore::new()));
    let registry = coordinator.registry();

    registry.merge(bledeck_core::Advertisement::new("B"));
    assert_eq!(registry.len(), 1);
    assert!(registry.visible().is_empty());

    registry.merge(sensor("B", "Thermo"));
    let visible = registry.visible();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].display_name(), "Thermo");
    assert_eq!(visible[0].status, DeviceStatus::Unpaired);
}

#[tokio::test(start_paused = true)]
async fn test_scan_window_merges_and_persists() {
    let ble = FakeBle::powered_on();
    ble.queue_scan(vec![
        sensor("A", "Sensor1"),
        sensor("B", "Sensor2"),
        sensor("A", "Sensor1").with_rssi(-60),
    ]);
    let store = Arc::new(MemoryStore::new());
    let (coordinator, _notices) = harness(ble.clone(), store.clone());

    let outcome = coordinator.scan_window().await.unwrap();

    assert_eq!(outcome, WindowOutcome::Completed { advertisements: 3 });
    assert!(!coordinator.is_scanning());
    assert_eq!(ble.stop_scan_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored(&store), coordinator.registry().snapshot());
    assert_eq!(coordinator.registry().get("A").unwrap().rssi, Some(-60));
}

#[tokio::test(start_paused = true)]
async fn test_empty_window_then_rescan() {
    let ble = FakeBle::powered_on();
    let (coordinator, _notices) = harness(ble.clone(), Arc::new(MemoryStore::new()));
    let mut scanning = coordinator.scanning();
    let started = tokio::time::Instant::now();

    let task = coordinator.spawn();

    scanning.wait_for(|s| *s).await.unwrap();
    scanning.wait_for(|s| !*s).await.unwrap();
    assert!(coordinator.registry().is_empty());
    assert_eq!(ble.start_scan_calls.load(Ordering::SeqCst), 1);

    // 冷却 5 秒后自动开始下一个窗口
    scanning.wait_for(|s| *s).await.unwrap();
    assert_eq!(ble.start_scan_calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(10));

    coordinator.shutdown().await;
    task.await.unwrap();
    assert!(!coordinator.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_start_scanning_skips_cooldown() {
    let ble = FakeBle::powered_on();
    let (coordinator, _notices) = harness(ble.clone(), Arc::new(MemoryStore::new()));
    let mut scanning = coordinator.scanning();

    let task = coordinator.spawn();
    scanning.wait_for(|s| *s).await.unwrap();
    scanning.wait_for(|s| !*s).await.unwrap();

    let ended = tokio::time::Instant::now();
    coordinator.start_scanning();
    scanning.wait_for(|s| *s).await.unwrap();
    assert!(ended.elapsed() < Duration::from_secs(5));

    coordinator.shutdown().await;
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_scanning_during_window_keeps_cooldown() {
    let ble = FakeBle::powered_on();
    let (coordinator, _notices) = harness(ble.clone(), Arc::new(MemoryStore::new()));
    let mut scanning = coordinator.scanning();

    let task = coordinator.spawn();
    scanning.wait_for(|s| *s).await.unwrap();
    coordinator.start_scanning();
    scanning.wait_for(|s| !*s).await.unwrap();

    let ended = tokio::time::Instant::now();
    scanning.wait_for(|s| *s).await.unwrap();
    assert!(ended.elapsed() >= Duration::from_secs(5));
    assert_eq!(ble.start_scan_calls.load(Ordering::SeqCst), 2);

    coordinator.shutdown().await;
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_window_is_rejected() {
    let ble = FakeBle::powered_on();
    let (coordinator, _notices) = harness(ble.clone(), Arc::new(MemoryStore::new()));

    let (first, second) = tokio::join!(coordinator.scan_window(), coordinator.scan_window());

    assert_eq!(first.unwrap(), WindowOutcome::Completed { advertisements: 0 });
    assert_eq!(second.unwrap(), WindowOutcome::AlreadyScanning);
    assert_eq!(ble.start_scan_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_scanning_ends_window() {
    let ble = FakeBle::powered_on();
    let store = Arc::new(MemoryStore::new());
    let (coordinator, _notices) = harness(ble.clone(), store.clone());
    let mut scanning = coordinator.scanning();

    let window = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.scan_window().await }
    });
    scanning.wait_for(|s| *s).await.unwrap();
    coordinator.stop_scanning();

    assert_eq!(window.await.unwrap().unwrap(), WindowOutcome::Stopped);
    assert!(!coordinator.is_scanning());
    assert!(store.raw(DEVICES_KEY).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_adapter_powered_off_mid_window() {
    let ble = FakeBle::powered_on();
    let (coordinator, mut notices) = harness(ble.clone(), Arc::new(MemoryStore::new()));
    let mut scanning = coordinator.scanning();

    let window = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.scan_window().await }
    });
    scanning.wait_for(|s| *s).await.unwrap();
    while ble.subscriber_count() == 0 {
        tokio::task::yield_now().await;
    }
    ble.set_state(AdapterState::PoweredOff);

    assert_eq!(window.await.unwrap().unwrap(), WindowOutcome::PoweredOff);
    assert!(!coordinator.is_scanning());
    let notices = drain(&mut notices);
    assert!(
        notices
            .iter()
            .any(|n| n.title == "Bluetooth is turned off" && n.severity == Severity::Warning)
    );
}

#[tokio::test(start_paused = true)]
async fn test_loop_waits_for_power_after_adapter_off() {
    let ble = FakeBle::powered_on();
    let (coordinator, _notices) = harness(ble.clone(), Arc::new(MemoryStore::new()));
    let mut scanning = coordinator.scanning();

    let task = coordinator.spawn();
    scanning.wait_for(|s| *s).await.unwrap();
    while ble.subscriber_count() == 0 {
        tokio::task::yield_now().await;
    }
    ble.set_state(AdapterState::PoweredOff);
    scanning.wait_for(|s| !*s).await.unwrap();

    // 适配器关闭期间不会再尝试扫描，也不会自动打开电源
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ble.start_scan_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ble.enable_calls.load(Ordering::SeqCst), 0);

    ble.set_state(AdapterState::PoweredOn);
    scanning.wait_for(|s| *s).await.unwrap();
    assert_eq!(ble.start_scan_calls.load(Ordering::SeqCst), 2);

    coordinator.shutdown().await;
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scan_error_notifies_and_persists() {
    let ble = FakeBle::powered_on();
    ble.fail_scan("busy");
    let store = Arc::new(MemoryStore::new());
    let (coordinator, mut notices) = harness(ble, store.clone());

    let result = coordinator.scan_window().await;

    assert!(matches!(result, Err(CoordinatorError::Scan(_))));
    assert!(!coordinator.is_scanning());
    assert!(drain(&mut notices).iter().any(|n| n.title == "Scan failed"));
    assert!(store.raw(DEVICES_KEY).is_some());
}

#[tokio::test]
async fn test_pair_unknown_device() {
    let ble = FakeBle::powered_on();
    let (coordinator, mut notices) = harness(ble.clone(), Arc::new(MemoryStore::new()));

    let result = coordinator.pair("missing").await;

    assert!(matches!(result, Err(CoordinatorError::DeviceNotFound(id)) if id == "missing"));
    assert_eq!(ble.connect_calls.load(Ordering::SeqCst), 0);
    assert!(coordinator.registry().is_empty());
    let notices = drain(&mut notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "Device not found");
}

#[tokio::test]
async fn test_pair_success_persists_connected() {
    let ble = FakeBle::powered_on();
    let store = Arc::new(MemoryStore::new());
    let (coordinator, _notices) = harness(ble.clone(), store.clone());
    coordinator.registry().merge(sensor("A", "Sensor1"));

    coordinator.pair("A").await.unwrap();

    assert_eq!(
        coordinator.registry().get("A").unwrap().status,
        DeviceStatus::Connected
    );
    assert_eq!(ble.connect_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored(&store), coordinator.registry().snapshot());
}

#[tokio::test]
async fn test_pair_failure_returns_to_unpaired() {
    let ble = FakeBle::powered_on();
    ble.fail_connect("timeout");
    let store = Arc::new(MemoryStore::new());
    let (coordinator, mut notices) = harness(ble, store.clone());
    coordinator.registry().merge(sensor("A", "Sensor1"));

    let result = coordinator.pair("A").await;

    assert!(matches!(result, Err(CoordinatorError::Connect(_))));
    assert_eq!(
        coordinator.registry().get("A").unwrap().status,
        DeviceStatus::Unpaired
    );
    assert_eq!(stored(&store)[0].status, DeviceStatus::Unpaired);
    let notices = drain(&mut notices);
    assert!(
        notices
            .iter()
            .any(|n| n.message.starts_with("Failed to connect to device"))
    );
}

#[tokio::test]
async fn test_unpair_persists_snapshot() {
    let ble = FakeBle::powered_on();
    let store = Arc::new(MemoryStore::new());
    let (coordinator, _notices) = harness(ble.clone(), store.clone());
    let registry = coordinator.registry();
    registry.merge(sensor("A", "Sensor1"));
    registry.merge(sensor("B", "Sensor2"));
    registry.set_status("A", DeviceStatus::Connected);

    coordinator.unpair("A").await.unwrap();

    assert_eq!(registry.get("A").unwrap().status, DeviceStatus::Disconnected);
    assert_eq!(ble.disconnect_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored(&store), registry.snapshot());
}

#[tokio::test]
async fn test_unpair_failure_restores_previous() {
    let ble = FakeBle::powered_on();
    ble.fail_disconnect("link lost");
    let (coordinator, _notices) = harness(ble, Arc::new(MemoryStore::new()));
    coordinator.registry().merge(sensor("A", "Sensor1"));
    coordinator
        .registry()
        .set_status("A", DeviceStatus::Connected);

    let result = coordinator.unpair("A").await;

    assert!(matches!(result, Err(CoordinatorError::Disconnect(_))));
    assert_eq!(
        coordinator.registry().get("A").unwrap().status,
        DeviceStatus::Connected
    );
}

#[tokio::test]
async fn test_operation_in_progress() {
    let ble = FakeBle::powered_on();
    let (coordinator, _notices) = harness(ble.clone(), Arc::new(MemoryStore::new()));
    coordinator.registry().merge(sensor("A", "Sensor1"));
    coordinator
        .registry()
        .set_status("A", DeviceStatus::Connecting);

    let result = coordinator.unpair("A").await;

    assert!(matches!(
        result,
        Err(CoordinatorError::OperationInProgress {
            status: DeviceStatus::Connecting,
            ..
        })
    ));
    assert_eq!(ble.disconnect_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_persist_and_reload() {
    let store = Arc::new(MemoryStore::new());
    {
        let (coordinator, _notices) = harness(FakeBle::powered_on(), store.clone());
        coordinator
            .registry()
            .merge(sensor("A", "Sensor1").with_manufacturer_data(0x004c, vec![2, 0x15]));
        coordinator.registry().merge(sensor("B", "Sensor2"));
        coordinator.pair("A").await.unwrap();
    }

    let (coordinator, _notices) = harness(FakeBle::powered_on(), store.clone());
    assert_eq!(coordinator.load().await.unwrap(), 2);

    let a = coordinator.registry().get("A").unwrap();
    assert_eq!(a.status, DeviceStatus::Connected);
    assert_eq!(a.manufacturer_data[&0x004c], vec![2, 0x15]);
    assert_eq!(
        coordinator.registry().get("B").unwrap().status,
        DeviceStatus::Unpaired
    );
}

#[tokio::test]
async fn test_load_migrates_legacy_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let legacy = r#"[
        {"id": "A", "name": "Beacon", "status": "connecting", "manufacturerData": "TAACFQ=="},
        {"id": "B", "status": "disconnected (paired)", "serviceUUIDs": ["0000180f-0000-1000-8000-00805f9b34fb"]},
        {"name": "no id"}
    ]"#;
    bledeck_core::KeyValueStore::set(store.as_ref(), DEVICES_KEY, legacy.to_string())
        .await
        .unwrap();

    let (coordinator, _notices) = harness(FakeBle::powered_on(), store);
    assert_eq!(coordinator.load().await.unwrap(), 2);

    let a = coordinator.registry().get("A").unwrap();
    assert_eq!(a.status, DeviceStatus::Unpaired);
    assert_eq!(a.manufacturer_data[&0x004c], vec![0x02, 0x15]);
    let b = coordinator.registry().get("B").unwrap();
    assert_eq!(b.status, DeviceStatus::Disconnected);
    assert_eq!(b.service_uuids.len(), 1);
}

#[tokio::test]
async fn test_load_keeps_in_memory_entries() {
    let store = Arc::new(MemoryStore::new());
    {
        let (coordinator, _notices) = harness(FakeBle::powered_on(), store.clone());
        coordinator.registry().merge(sensor("A", "Old name"));
        coordinator.persist_now().await.unwrap();
    }

    let (coordinator, _notices) = harness(FakeBle::powered_on(), store);
    coordinator.registry().merge(sensor("A", "New name"));
    assert_eq!(coordinator.load().await.unwrap(), 0);
    assert_eq!(
        coordinator.registry().get("A").unwrap().name.as_deref(),
        Some("New name")
    );
}

#[tokio::test]
async fn test_failed_save_marks_dirty_until_retry() {
    let store = FlakyStore::new();
    store.set_failing(true);
    let (coordinator, mut notices) = harness(FakeBle::powered_on(), store.clone());
    coordinator.registry().merge(sensor("A", "Sensor1"));

    coordinator.pair("A").await.unwrap();

    // 内存状态不回滚
    assert_eq!(
        coordinator.registry().get("A").unwrap().status,
        DeviceStatus::Connected
    );
    assert!(coordinator.is_dirty());
    assert!(
        drain(&mut notices)
            .iter()
            .any(|n| n.severity == Severity::Error && n.message.contains("disk full"))
    );

    store.set_failing(false);
    coordinator.persist_now().await.unwrap();
    assert!(!coordinator.is_dirty());
    let saved = devices::decode(&store.raw(DEVICES_KEY).unwrap()).unwrap();
    assert_eq!(saved[0].status, DeviceStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ignores_late_connect() {
    let ble = FakeBle::powered_on();
    ble.delay_connect(Duration::from_secs(30));
    let store = Arc::new(MemoryStore::new());
    let (coordinator, _notices) = harness(ble.clone(), store.clone());
    coordinator.registry().merge(sensor("A", "Sensor1"));

    let pairing = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.pair("A").await }
    });
    while ble.connect_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    coordinator.shutdown().await;

    assert!(matches!(
        pairing.await.unwrap(),
        Err(CoordinatorError::ShutDown)
    ));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        coordinator.registry().get("A").unwrap().status,
        DeviceStatus::Connecting
    );
    assert_eq!(stored(&store)[0].status, DeviceStatus::Connecting);
    assert!(matches!(
        coordinator.pair("A").await,
        Err(CoordinatorError::ShutDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_window_without_persisting() {
    let ble = FakeBle::powered_on();
    ble.queue_scan(vec![sensor("A", "Sensor1")]);
    let store = Arc::new(MemoryStore::new());
    let (coordinator, _notices) = harness(ble.clone(), store.clone());
    let mut scanning = coordinator.scanning();

    let window = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.scan_window().await }
    });
    scanning.wait_for(|s| *s).await.unwrap();
    coordinator.shutdown().await;

    assert_eq!(window.await.unwrap().unwrap(), WindowOutcome::Cancelled);
    assert!(store.raw(DEVICES_KEY).is_none());
    assert!(!coordinator.is_scanning());
}

struct Recorder(Mutex<Vec<String>>);

#[async_trait::async_trait]
impl ScanCallback for Recorder {
    async fn on_advertisement(&self, device: &DeviceRecord) {
        self.0.lock().unwrap().push(device.id.clone());
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_callback_sees_merged_records() {
    let ble = FakeBle::powered_on();
    ble.queue_scan(vec![sensor("A", "Sensor1"), sensor("B", "Sensor2")]);
    let (coordinator, _notices) = harness(ble, Arc::new(MemoryStore::new()));
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    coordinator.on_advertisement(recorder.clone());

    coordinator.scan_window().await.unwrap();

    assert_eq!(*recorder.0.lock().unwrap(), vec!["A", "B"]);
}

struct StatusRecorder(Mutex<Vec<(String, DeviceStatus)>>);

#[async_trait::async_trait]
impl ScanCallback for StatusRecorder {
    async fn on_advertisement(&self, device: &DeviceRecord) {
        self.0
            .lock()
            .unwrap()
            .push((device.id.clone(), device.status));
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_merge_during_pair_keeps_status() {
    let ble = FakeBle::powered_on();
    ble.delay_connect(Duration::from_secs(3));
    ble.queue_scan(vec![sensor("A", "Sensor1").with_rssi(-40)]);
    let store = Arc::new(MemoryStore::new());
    let (coordinator, _notices) = harness(ble.clone(), store.clone());
    coordinator.registry().merge(sensor("A", "Sensor1"));
    let recorder = Arc::new(StatusRecorder(Mutex::new(Vec::new())));
    coordinator.on_advertisement(recorder.clone());

    let pairing = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.pair("A").await }
    });
    while ble.connect_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    // 连接仍在进行时扫描窗口合并同一设备
    let outcome = coordinator.scan_window().await.unwrap();
    assert_eq!(outcome, WindowOutcome::Completed { advertisements: 1 });
    pairing.await.unwrap().unwrap();

    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![("A".to_string(), DeviceStatus::Connecting)]
    );
    let record = coordinator.registry().get("A").unwrap();
    assert_eq!(record.status, DeviceStatus::Connected);
    assert_eq!(record.rssi, Some(-40));
    assert_eq!(coordinator.registry().len(), 1);
    assert_eq!(stored(&store), coordinator.registry().snapshot());
}
