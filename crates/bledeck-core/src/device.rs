//! 设备模型
//!
//! `Advertisement` 是 BLE 协作方在扫描时交给我们的原始数据，
//! `DeviceRecord` 是注册表中保存的条目：广播字段 + 应用自行维护的 `status`。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// 设备配对状态
///
/// 序列化标签与持久化数据中的字符串保持一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    #[default]
    #[serde(rename = "unpaired (free)")]
    Unpaired,
    #[serde(rename = "connecting")]
    Connecting,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "disconnecting")]
    Disconnecting,
    #[serde(rename = "disconnected (paired)")]
    Disconnected,
}

impl DeviceStatus {
    pub const ALL: [DeviceStatus; 5] = [
        DeviceStatus::Unpaired,
        DeviceStatus::Connecting,
        DeviceStatus::Connected,
        DeviceStatus::Disconnecting,
        DeviceStatus::Disconnected,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DeviceStatus::Unpaired => "unpaired (free)",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Connected => "connected",
            DeviceStatus::Disconnecting => "disconnecting",
            DeviceStatus::Disconnected => "disconnected (paired)",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }

    /// 正在进行 pair/unpair 操作
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceStatus::Connecting | DeviceStatus::Disconnecting)
    }

    /// 进程重启后过渡状态没有意义，折算为操作开始前的稳定状态
    pub fn settled(self) -> Self {
        match self {
            DeviceStatus::Connecting => DeviceStatus::Unpaired,
            DeviceStatus::Disconnecting => DeviceStatus::Disconnected,
            other => other,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 一次扫描回调携带的广播数据
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub is_connectable: Option<bool>,
    pub rssi: Option<i16>,
    pub tx_power_level: Option<i16>,
    /// 厂商 ID -> 原始数据
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_manufacturer_data(mut self, company_id: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data.insert(company_id, data);
        self
    }

    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// 注册表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_connectable: Option<bool>,
    #[serde(default)]
    pub rssi: Option<i16>,
    #[serde(default)]
    pub tx_power_level: Option<i16>,
    #[serde(default)]
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    #[serde(default)]
    pub service_uuids: Vec<Uuid>,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl DeviceRecord {
    pub fn from_advertisement(adv: Advertisement, status: DeviceStatus) -> Self {
        Self {
            id: adv.id,
            name: adv.name,
            is_connectable: adv.is_connectable,
            rssi: adv.rssi,
            tx_power_level: adv.tx_power_level,
            manufacturer_data: adv.manufacturer_data,
            service_uuids: adv.service_uuids,
            status,
        }
    }

    /// 用新的广播覆盖所有广播字段，`status` 保持不变
    pub fn absorb(&mut self, adv: Advertisement) {
        let status = self.status;
        *self = Self::from_advertisement(adv, status);
    }

    /// 有名称的设备才出现在列表中
    pub fn is_listed(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }

    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => format!("Unknown Device ({})", self.id),
        }
    }

    /// 详情视图使用的原始字段列表 (字段名, JSON 值)
    pub fn fields(&self) -> Vec<(String, String)> {
        let Ok(serde_json::Value::Object(map)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        map.into_iter()
            .map(|(key, value)| {
                let rendered = serde_json::to_string_pretty(&value).unwrap_or_default();
                (key, rendered)
            })
            .collect()
    }
}
