//! 扫描 / 注册表协调器
//!
//! 拥有设备注册表，负责：
//!
//! - **scan**: 经过就绪检查后打开扫描窗口，把广播合并进注册表，窗口结束后持久化，
//!   冷却后自动开始下一个窗口
//! - **pairing**: `pair` / `unpair`，状态变化立即持久化
//!
//! 所有异步续体都绑定到协调器的生命周期令牌，`shutdown()` 之后迟到的完成
//! 不会再写注册表。
//!
//! # 使用示例
//!
//! ```ignore
//! let (coordinator, mut notices) = ScanCoordinator::system(&AppSettings::load()).await?;
//! let task = coordinator.spawn();
//!
//! let mut devices = coordinator.devices();
//! devices.changed().await?;
//! coordinator.pair("AA:BB:CC:DD:EE:FF").await?;
//!
//! coordinator.shutdown().await;
//! task.await?;
//! ```

mod pairing;
mod scan;

use crate::ble::{BleCentral, BleError, ScanCallback, SystemBle};
use crate::config::AppSettings;
use crate::device::{DeviceRecord, DeviceStatus};
use crate::gate::{NotReady, PermissionProvider, ReadinessGate, SystemPermissions};
use crate::notice::{Notice, Notifier};
use crate::registry::Registry;
use crate::store::{DeviceStore, FileStore, KeyValueStore, StoreError};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub scan_window: Duration,
    pub rescan_interval: Duration,
    pub request_fine_location: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(5),
            rescan_interval: Duration::from_secs(5),
            request_fine_location: true,
        }
    }
}

/// 一个扫描窗口的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// 计时结束（或协作方关闭了广播流）
    Completed { advertisements: usize },
    /// `stop_scanning()`
    Stopped,
    /// 扫描中适配器被关闭
    PoweredOff,
    /// 已有窗口在进行
    AlreadyScanning,
    /// 协调器已关闭
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Not ready to scan: {0}")]
    NotReady(#[from] NotReady),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Scan failed: {0}")]
    Scan(#[source] BleError),

    #[error("Failed to connect to device: {0}")]
    Connect(#[source] BleError),

    #[error("Failed to disconnect from device: {0}")]
    Disconnect(#[source] BleError),

    #[error("Failed to save device statuses: {0}")]
    Persistence(#[from] StoreError),

    #[error("Device {id} is busy ({status})")]
    OperationInProgress { id: String, status: DeviceStatus },

    #[error("Coordinator has been shut down")]
    ShutDown,
}

pub struct ScanCoordinator {
    ble: Arc<dyn BleCentral>,
    gate: ReadinessGate,
    store: DeviceStore,
    registry: Registry,
    notifier: Notifier,
    options: CoordinatorOptions,
    scanning: watch::Sender<bool>,
    /// 当前扫描窗口的令牌，`stop_scanning()` 取消它
    window: Mutex<Option<CancellationToken>>,
    lifetime: CancellationToken,
    start_signal: Notify,
    persist_lock: tokio::sync::Mutex<()>,
    dirty: AtomicBool,
    loaded: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn ScanCallback>>>,
}

impl ScanCoordinator {
    pub fn new(
        ble: Arc<dyn BleCentral>,
        permissions: Arc<dyn PermissionProvider>,
        kv: Arc<dyn KeyValueStore>,
        options: CoordinatorOptions,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Notice>) {
        let (notifier, notices) = Notifier::channel();
        let gate = ReadinessGate::new(
            permissions,
            ble.clone(),
            notifier.clone(),
            options.request_fine_location,
        );
        let (scanning, _) = watch::channel(false);

        let coordinator = Self {
            ble,
            gate,
            store: DeviceStore::new(kv),
            registry: Registry::new(),
            notifier,
            options,
            scanning,
            window: Mutex::new(None),
            lifetime: CancellationToken::new(),
            start_signal: Notify::new(),
            persist_lock: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        };
        (Arc::new(coordinator), notices)
    }

    /// 使用系统 BLE 栈、桌面权限和数据目录下的文件存储
    pub async fn system(
        settings: &AppSettings,
    ) -> anyhow::Result<(Arc<Self>, mpsc::UnboundedReceiver<Notice>)> {
        let ble = SystemBle::new().await?;
        let store = FileStore::new(settings.data_dir.clone());
        Ok(Self::new(
            Arc::new(ble),
            Arc::new(SystemPermissions::new()),
            Arc::new(store),
            settings.coordinator_options(),
        ))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// 注册表的观察端，UI 据此重绘
    pub fn devices(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.registry.subscribe()
    }

    pub fn scanning(&self) -> watch::Receiver<bool> {
        self.scanning.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning.borrow()
    }

    /// 最近一次保存失败后，内存与存储是否不一致
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// 注册广播回调
    pub fn on_advertisement(&self, callback: Arc<dyn ScanCallback>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// 从存储恢复注册表，返回新增的设备数量
    pub async fn load(&self) -> Result<usize, CoordinatorError> {
        let records = self.store.load().await?;
        self.ensure_alive()?;
        let added = self.registry.restore(records);
        self.loaded.store(true, Ordering::SeqCst);
        info!("Restored {} device(s) from storage", added);
        Ok(added)
    }

    /// 立即写入当前快照；保存失败后可用于重试
    pub async fn persist_now(&self) -> Result<(), CoordinatorError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.registry.snapshot();
        match self.store.save(&snapshot).await {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                debug!("Persisted {} device(s)", snapshot.len());
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// 持久化并把失败转换为提示，不回滚内存状态
    async fn persist(&self) {
        if self.is_shut_down() {
            return;
        }
        if let Err(e) = self.persist_now().await {
            self.notifier.error("Error", e.to_string());
        }
    }

    /// 关闭协调器：结束当前窗口、释放扫描，之后的完成回调被忽略
    pub async fn shutdown(&self) {
        if self.lifetime.is_cancelled() {
            return;
        }
        info!("Shutting down scan coordinator");
        self.lifetime.cancel();
        if let Err(e) = self.ble.stop_scan().await {
            debug!("stop_scan during shutdown: {}", e);
        }
    }

    fn ensure_alive(&self) -> Result<(), CoordinatorError> {
        if self.is_shut_down() {
            Err(CoordinatorError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// 在生命周期内等待 `fut`，协调器关闭后返回 `ShutDown`
    async fn bound<T>(&self, fut: impl Future<Output = T>) -> Result<T, CoordinatorError> {
        tokio::select! {
            biased;
            () = self.lifetime.cancelled() => {
                warn!("Ignoring completion after shutdown");
                Err(CoordinatorError::ShutDown)
            }
            out = fut => Ok(out),
        }
    }
}
