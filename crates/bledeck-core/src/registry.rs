//! 设备注册表
//!
//! 注册表是一个 `watch` 通道中的 `Vec<DeviceRecord>`（按发现顺序）。
//! 所有修改都通过 `send_modify` / `send_if_modified` 在最新快照上执行，
//! 观察者只能看到完整的修改结果，不存在持有旧副本再写回的路径。

use crate::device::{Advertisement, DeviceRecord, DeviceStatus};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
}

/// `begin_operation` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied { previous: DeviceStatus },
    Missing,
    /// 设备正处于另一个操作的过渡状态
    Busy(DeviceStatus),
}

#[derive(Clone)]
pub struct Registry {
    tx: Arc<watch::Sender<Vec<DeviceRecord>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.tx.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.tx.borrow().iter().find(|d| d.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tx.borrow().iter().any(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// 列表中可见的设备（有名称）
    pub fn visible(&self) -> Vec<DeviceRecord> {
        self.tx
            .borrow()
            .iter()
            .filter(|d| d.is_listed())
            .cloned()
            .collect()
    }

    /// 合并一条广播：新设备以 `unpaired (free)` 插入，已知设备只更新广播字段
    pub fn merge(&self, adv: Advertisement) -> MergeOutcome {
        let mut outcome = MergeOutcome::Inserted;
        self.tx.send_modify(|devices| {
            if let Some(existing) = devices.iter_mut().find(|d| d.id == adv.id) {
                existing.absorb(adv);
                outcome = MergeOutcome::Updated;
            } else {
                devices.push(DeviceRecord::from_advertisement(adv, DeviceStatus::Unpaired));
            }
        });
        outcome
    }

    /// 设置状态，返回之前的状态；设备不存在时返回 `None`
    pub fn set_status(&self, id: &str, status: DeviceStatus) -> Option<DeviceStatus> {
        let mut previous = None;
        self.tx.send_if_modified(|devices| {
            let Some(device) = devices.iter_mut().find(|d| d.id == id) else {
                return false;
            };
            previous = Some(device.status);
            if device.status == status {
                return false;
            }
            device.status = status;
            true
        });
        previous
    }

    /// 原子地检查并进入过渡状态（`connecting` / `disconnecting`）
    pub fn begin_operation(&self, id: &str, transient: DeviceStatus) -> StatusUpdate {
        let mut update = StatusUpdate::Missing;
        self.tx.send_if_modified(|devices| {
            let Some(device) = devices.iter_mut().find(|d| d.id == id) else {
                return false;
            };
            if device.status.is_transient() {
                update = StatusUpdate::Busy(device.status);
                return false;
            }
            update = StatusUpdate::Applied {
                previous: device.status,
            };
            device.status = transient;
            true
        });
        update
    }

    /// 恢复持久化的记录，已存在的 id 以内存中的为准。返回新增数量。
    pub fn restore(&self, records: Vec<DeviceRecord>) -> usize {
        let mut added = 0;
        self.tx.send_if_modified(|devices| {
            for record in records {
                if !devices.iter().any(|d| d.id == record.id) {
                    devices.push(record);
                    added += 1;
                }
            }
            added > 0
        });
        added
    }
}
