//! 测试用协作方：可编排的 BLE 栈、权限和存储

#![allow(dead_code)]

use async_trait::async_trait;
use bledeck_core::ble::{AdvertisementStream, StateStream};
use bledeck_core::{
    AdapterState, Advertisement, BleCentral, BleError, CoordinatorOptions, KeyValueStore,
    MemoryStore, Notice, Permission, PermissionOutcome, PermissionProvider, Platform,
    ScanCoordinator, StoreError,
};
use futures_util::{StreamExt, stream};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub struct FakeBle {
    state: Mutex<AdapterState>,
    enable_error: Mutex<Option<String>>,
    scan_error: Mutex<Option<String>>,
    connect_error: Mutex<Option<String>>,
    disconnect_error: Mutex<Option<String>>,
    connect_delay: Mutex<Option<Duration>>,
    batches: Mutex<VecDeque<Vec<Advertisement>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AdapterState>>>,
    pub enable_calls: AtomicUsize,
    pub start_scan_calls: AtomicUsize,
    pub stop_scan_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
}

impl FakeBle {
    pub fn new(state: AdapterState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            enable_error: Mutex::new(None),
            scan_error: Mutex::new(None),
            connect_error: Mutex::new(None),
            disconnect_error: Mutex::new(None),
            connect_delay: Mutex::new(None),
            batches: Mutex::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
            enable_calls: AtomicUsize::new(0),
            start_scan_calls: AtomicUsize::new(0),
            stop_scan_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        })
    }

    pub fn powered_on() -> Arc<Self> {
        Self::new(AdapterState::PoweredOn)
    }

    /// 下一个扫描窗口立即产出这些广播，之后保持静默直到窗口结束
    pub fn queue_scan(&self, batch: Vec<Advertisement>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn set_state(&self, state: AdapterState) {
        *self.state.lock().unwrap() = state;
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(state).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn fail_enable(&self, message: &str) {
        *self.enable_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_scan(&self, message: &str) {
        *self.scan_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_connect(&self, message: &str) {
        *self.connect_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_disconnect(&self, message: &str) {
        *self.disconnect_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn delay_connect(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

}

#[async_trait]
impl BleCentral for FakeBle {
    async fn state(&self) -> Result<AdapterState, BleError> {
        Ok(*self.state.lock().unwrap())
    }

    async fn enable(&self) -> Result<(), BleError> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.enable_error.lock().unwrap().clone() {
            return Err(BleError::Adapter(message));
        }
        self.set_state(AdapterState::PoweredOn);
        Ok(())
    }

    async fn state_changes(&self, emit_current: bool) -> Result<StateStream, BleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        if emit_current {
            let _ = tx.send(*self.state.lock().unwrap());
        }
        self.subscribers.lock().unwrap().push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn start_scan(&self) -> Result<AdvertisementStream, BleError> {
        self.start_scan_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.scan_error.lock().unwrap().clone() {
            return Err(BleError::Scan(message));
        }
        let batch = self.batches.lock().unwrap().pop_front().unwrap_or_default();
        Ok(stream::iter(batch.into_iter().map(Ok))
            .chain(stream::pending())
            .boxed())
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        self.stop_scan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, _id: &str) -> Result<(), BleError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.connect_error.lock().unwrap().clone() {
            Some(message) => Err(BleError::ConnectionFailed(message)),
            None => Ok(()),
        }
    }

    async fn discover_services(&self, _id: &str) -> Result<(), BleError> {
        Ok(())
    }

    async fn disconnect(&self, _id: &str) -> Result<(), BleError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        match self.disconnect_error.lock().unwrap().clone() {
            Some(message) => Err(BleError::DisconnectFailed(message)),
            None => Ok(()),
        }
    }
}

pub struct FakePermissions {
    platform: Platform,
    granted: Vec<Permission>,
    location_enabled: bool,
    pub requests: Mutex<Vec<Vec<Permission>>>,
    pub settings_opened: AtomicBool,
}

impl FakePermissions {
    pub fn implicit() -> Arc<Self> {
        Self::runtime(Platform::Implicit, &[], true)
    }

    pub fn runtime(platform: Platform, granted: &[Permission], location_enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            platform,
            granted: granted.to_vec(),
            location_enabled,
            requests: Mutex::new(Vec::new()),
            settings_opened: AtomicBool::new(false),
        })
    }

    pub fn requested(&self) -> Vec<Vec<Permission>> {
        self.requests.lock().unwrap().clone()
    }

    fn outcome(&self, permission: Permission) -> PermissionOutcome {
        if self.granted.contains(&permission) {
            PermissionOutcome::Granted
        } else {
            PermissionOutcome::Denied
        }
    }
}

#[async_trait]
impl PermissionProvider for FakePermissions {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn request(&self, permission: Permission) -> PermissionOutcome {
        self.requests.lock().unwrap().push(vec![permission]);
        self.outcome(permission)
    }

    async fn request_multiple(
        &self,
        permissions: &[Permission],
    ) -> HashMap<Permission, PermissionOutcome> {
        self.requests.lock().unwrap().push(permissions.to_vec());
        // 只回报已授予的条目，模拟平台漏报
        permissions
            .iter()
            .filter(|p| self.granted.contains(p))
            .map(|p| (*p, PermissionOutcome::Granted))
            .collect()
    }

    async fn location_services_enabled(&self) -> bool {
        self.location_enabled
    }

    async fn open_settings(&self) -> std::io::Result<()> {
        self.settings_opened.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// 可切换为写入失败的存储
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner.raw(key)
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.set(key, value).await
    }
}

pub fn harness(
    ble: Arc<FakeBle>,
    store: Arc<dyn KeyValueStore>,
) -> (Arc<ScanCoordinator>, mpsc::UnboundedReceiver<Notice>) {
    ScanCoordinator::new(
        ble,
        FakePermissions::implicit(),
        store,
        CoordinatorOptions::default(),
    )
}

pub fn drain(notices: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

pub fn sensor(id: &str, name: &str) -> Advertisement {
    Advertisement::new(id).with_name(name)
}
