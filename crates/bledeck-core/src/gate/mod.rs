//! 权限与就绪检查
//!
//! 扫描前依次检查：
//!
//! 1. 运行时权限（API < 31 只请求定位；>= 31 一次请求扫描/连接/可选定位，必须全部授予）
//! 2. 定位服务是否开启（关闭时提示用户，不自动打开设置）
//! 3. 适配器电源（未开启时尝试打开一次，失败不重试）
//!
//! 每一步失败都会发出一条 `Notice`，同时返回 `NotReady` 说明原因。

pub mod permissions;
pub mod system;

pub use permissions::{
    FINE_GRAINED_BLUETOOTH_API_LEVEL, Permission, PermissionOutcome, PermissionProvider, Platform,
};
pub use system::SystemPermissions;

use crate::ble::{AdapterState, BleCentral};
use crate::notice::Notifier;
use log::{debug, info};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotReady {
    #[error("Permissions not granted: {0:?}")]
    PermissionDenied(Vec<Permission>),

    #[error("Location services disabled")]
    LocationServicesDisabled,

    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
}

pub struct ReadinessGate {
    permissions: Arc<dyn PermissionProvider>,
    ble: Arc<dyn BleCentral>,
    notifier: Notifier,
    request_fine_location: bool,
}

impl ReadinessGate {
    pub fn new(
        permissions: Arc<dyn PermissionProvider>,
        ble: Arc<dyn BleCentral>,
        notifier: Notifier,
        request_fine_location: bool,
    ) -> Self {
        Self {
            permissions,
            ble,
            notifier,
            request_fine_location,
        }
    }

    /// 可以开始扫描时返回 true
    pub async fn ensure_ready(&self) -> bool {
        self.check().await.is_ok()
    }

    pub async fn check(&self) -> Result<(), NotReady> {
        self.check_permissions().await?;
        self.check_location_services().await?;
        self.check_adapter().await
    }

    /// 打开系统设置，与检查流程分离，由用户显式触发
    pub async fn open_settings(&self) -> bool {
        match self.permissions.open_settings().await {
            Ok(()) => true,
            Err(e) => {
                debug!("open_settings failed: {}", e);
                self.notifier
                    .error("Cannot Open Settings", "Unable to open location settings.");
                false
            }
        }
    }

    async fn check_permissions(&self) -> Result<(), NotReady> {
        let Platform::Runtime { api_level } = self.permissions.platform() else {
            return Ok(());
        };

        let denied: Vec<Permission> = if api_level < FINE_GRAINED_BLUETOOTH_API_LEVEL {
            match self.permissions.request(Permission::FineLocation).await {
                PermissionOutcome::Granted => Vec::new(),
                PermissionOutcome::Denied => vec![Permission::FineLocation],
            }
        } else {
            let batch = self.permission_batch();
            let results = self.permissions.request_multiple(&batch).await;
            batch
                .into_iter()
                .filter(|p| results.get(p) != Some(&PermissionOutcome::Granted))
                .collect()
        };

        if denied.is_empty() {
            debug!("Permissions granted (API level {})", api_level);
            return Ok(());
        }

        let names: Vec<&str> = denied.iter().map(Permission::as_str).collect();
        self.notifier.error(
            "Permissions not granted",
            format!("Bluetooth permissions are required: {}", names.join(", ")),
        );
        Err(NotReady::PermissionDenied(denied))
    }

    fn permission_batch(&self) -> Vec<Permission> {
        let mut batch = vec![Permission::BluetoothScan, Permission::BluetoothConnect];
        if self.request_fine_location {
            batch.push(Permission::FineLocation);
        }
        batch
    }

    async fn check_location_services(&self) -> Result<(), NotReady> {
        if self.permissions.location_services_enabled().await {
            return Ok(());
        }
        self.notifier.warn(
            "Location Services Disabled",
            "Please enable location services to continue.",
        );
        Err(NotReady::LocationServicesDisabled)
    }

    async fn check_adapter(&self) -> Result<(), NotReady> {
        let state = match self.ble.state().await {
            Ok(state) => state,
            Err(e) => {
                self.notifier
                    .error("Error", format!("Bluetooth is unavailable: {e}"));
                return Err(NotReady::AdapterUnavailable(e.to_string()));
            }
        };

        if state == AdapterState::PoweredOn {
            return Ok(());
        }

        info!("Adapter is {}, trying to enable it", state);
        match self.ble.enable().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.notifier.error("Error", "Failed to enable Bluetooth");
                Err(NotReady::AdapterUnavailable(e.to_string()))
            }
        }
    }
}
