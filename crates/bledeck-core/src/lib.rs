//! BleDeck Core Library
//!
//! BLE 设备发现与配对的核心实现库
//!
//! # 模块
//!
//! - **gate**: 运行时权限、定位服务和适配器电源的就绪检查
//! - **coordinator**: 周期扫描、设备注册表合并、配对 / 取消配对
//! - **registry**: 设备注册表（唯一的修改路径）
//! - **store**: 注册表快照的持久化和旧格式迁移
//! - **ble**: BLE 协作方接口及 Linux 实现（btleplug + bluer）
//!
//! # 使用示例
//!
//! ```ignore
//! use bledeck_core::{AppSettings, ScanCoordinator};
//!
//! let settings = AppSettings::load();
//! let (coordinator, mut notices) = ScanCoordinator::system(&settings).await?;
//!
//! // 恢复已保存的设备并开始周期扫描
//! let task = coordinator.spawn();
//!
//! // 等待注册表变化
//! let mut devices = coordinator.devices();
//! devices.changed().await?;
//!
//! // 配对
//! coordinator.pair("AA:BB:CC:DD:EE:FF").await?;
//!
//! coordinator.shutdown().await;
//! task.await?;
//! ```

pub mod ble;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod gate;
pub mod logging;
pub mod notice;
pub mod registry;
pub mod store;

// BLE re-exports
pub use ble::{AdapterState, BleCentral, BleError, ScanCallback, SystemBle};

// Coordinator re-exports
pub use coordinator::{CoordinatorError, CoordinatorOptions, ScanCoordinator, WindowOutcome};

// Gate re-exports
pub use gate::{
    NotReady, Permission, PermissionOutcome, PermissionProvider, Platform, ReadinessGate,
    SystemPermissions,
};

// Store re-exports
pub use store::{DeviceStore, FileStore, KeyValueStore, MemoryStore, StoreError};

pub use config::AppSettings;
pub use device::{Advertisement, DeviceRecord, DeviceStatus};
pub use logging::{LogEntry, LogLevel};
pub use notice::{Notice, Notifier, Severity};
pub use registry::Registry;
