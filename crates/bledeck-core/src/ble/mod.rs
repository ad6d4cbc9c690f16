//! BLE 协作方
//!
//! 协调器只依赖 `BleCentral` trait，通过构造函数注入；
//! Linux 上的实现是 `SystemBle`（适配器电源走 bluer，扫描和连接走 btleplug）。

pub mod client;
pub mod power;
pub mod scanner;
pub mod system;

pub use client::BleClient;
pub use power::AdapterPower;
pub use scanner::BleScanner;
pub use system::SystemBle;

use crate::device::{Advertisement, DeviceRecord};
use futures_util::stream::BoxStream;
use std::fmt;

/// 扫描结果流，`Err` 表示协作方报告的扫描错误
pub type AdvertisementStream = BoxStream<'static, Result<Advertisement, BleError>>;

/// 适配器电源状态变化流
pub type StateStream = BoxStream<'static, AdapterState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    PoweredOff,
    PoweredOn,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterState::Unknown => "Unknown",
            AdapterState::PoweredOff => "PoweredOff",
            AdapterState::PoweredOn => "PoweredOn",
        };
        f.write_str(name)
    }
}

/// BLE 错误
#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("IO error: {0}")]
    IoError(#[from] btleplug::Error),

    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),
}

#[async_trait::async_trait]
pub trait BleCentral: Send + Sync {
    async fn state(&self) -> Result<AdapterState, BleError>;

    /// 尝试打开适配器电源
    async fn enable(&self) -> Result<(), BleError>;

    /// 电源状态变化；`emit_current` 为 true 时先产出当前状态
    async fn state_changes(&self, emit_current: bool) -> Result<StateStream, BleError>;

    async fn start_scan(&self) -> Result<AdvertisementStream, BleError>;

    async fn stop_scan(&self) -> Result<(), BleError>;

    async fn connect(&self, id: &str) -> Result<(), BleError>;

    async fn discover_services(&self, id: &str) -> Result<(), BleError>;

    async fn disconnect(&self, id: &str) -> Result<(), BleError>;
}

/// 扫描回调接口，每条广播合并进注册表后调用
#[async_trait::async_trait]
pub trait ScanCallback: Send + Sync {
    async fn on_advertisement(&self, device: &DeviceRecord);
}
