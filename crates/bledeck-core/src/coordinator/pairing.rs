//! 配对 / 取消配对
//!
//! 流程:
//! 1. 原子地把设备切换到过渡状态（`connecting` / `disconnecting`），设备不存在时直接失败
//! 2. 调用 BLE 协作方
//! 3. 根据结果写入最终状态并持久化；失败时恢复到安全状态，不会停留在过渡状态

use super::{CoordinatorError, ScanCoordinator};
use crate::device::DeviceStatus;
use crate::registry::StatusUpdate;
use log::info;

impl ScanCoordinator {
    pub async fn pair(&self, id: &str) -> Result<(), CoordinatorError> {
        self.ensure_alive()?;
        self.begin(id, DeviceStatus::Connecting)?;
        // 先持久化 connecting，崩溃后至少不会恢复成错误的 connected
        self.persist().await;

        let result = self
            .bound(async {
                self.ble.connect(id).await?;
                self.ble.discover_services(id).await
            })
            .await?;

        match result {
            Ok(()) => {
                self.registry.set_status(id, DeviceStatus::Connected);
                self.persist().await;
                info!("Paired with {}", id);
                Ok(())
            }
            Err(e) => {
                self.registry.set_status(id, DeviceStatus::Unpaired);
                self.persist().await;
                self.notifier
                    .error("Error", format!("Failed to connect to device: {e}"));
                Err(CoordinatorError::Connect(e))
            }
        }
    }

    pub async fn unpair(&self, id: &str) -> Result<(), CoordinatorError> {
        self.ensure_alive()?;
        let previous = self.begin(id, DeviceStatus::Disconnecting)?;

        let result = self.bound(self.ble.disconnect(id)).await?;

        match result {
            Ok(()) => {
                self.registry.set_status(id, DeviceStatus::Disconnected);
                self.persist().await;
                info!("Unpaired {}", id);
                Ok(())
            }
            Err(e) => {
                self.registry.set_status(id, previous);
                self.persist().await;
                self.notifier
                    .error("Error", format!("Failed to disconnect from device: {e}"));
                Err(CoordinatorError::Disconnect(e))
            }
        }
    }

    /// 进入过渡状态，返回之前的状态
    fn begin(&self, id: &str, transient: DeviceStatus) -> Result<DeviceStatus, CoordinatorError> {
        match self.registry.begin_operation(id, transient) {
            StatusUpdate::Applied { previous } => Ok(previous),
            StatusUpdate::Missing => {
                self.notifier.error("Error", "Device not found");
                Err(CoordinatorError::DeviceNotFound(id.to_string()))
            }
            StatusUpdate::Busy(status) => {
                self.notifier.warn(
                    "Busy",
                    format!("Device {id} is already {status}, please wait"),
                );
                Err(CoordinatorError::OperationInProgress {
                    id: id.to_string(),
                    status,
                })
            }
        }
    }
}
