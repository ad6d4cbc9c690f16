//! 操作系统权限协作方

use std::collections::HashMap;
use std::fmt;

/// 引入细粒度蓝牙权限（BLUETOOTH_SCAN / BLUETOOTH_CONNECT）的 API 级别
pub const FINE_GRAINED_BLUETOOTH_API_LEVEL: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// 没有运行时授权模型（桌面 Linux / iOS）
    Implicit,
    /// 运行时授权，附带平台 API 级别
    Runtime { api_level: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    FineLocation,
    BluetoothScan,
    BluetoothConnect,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::FineLocation => "android.permission.ACCESS_FINE_LOCATION",
            Permission::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            Permission::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
}

#[async_trait::async_trait]
pub trait PermissionProvider: Send + Sync {
    fn platform(&self) -> Platform;

    async fn request(&self, permission: Permission) -> PermissionOutcome;

    /// 一次弹出一批权限请求，缺失的条目视为拒绝
    async fn request_multiple(
        &self,
        permissions: &[Permission],
    ) -> HashMap<Permission, PermissionOutcome>;

    async fn location_services_enabled(&self) -> bool;

    async fn open_settings(&self) -> std::io::Result<()>;
}
