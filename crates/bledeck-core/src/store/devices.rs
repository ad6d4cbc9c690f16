//! 注册表快照的持久化格式
//!
//! 当前格式（schema 1）:
//!
//! ```json
//! { "schemaVersion": 1, "devices": [ { "id": "...", "status": "connected", ... } ] }
//! ```
//!
//! 旧数据是没有版本号的裸数组，其中 `manufacturerData` 为 base64 字符串
//! （前两个字节是小端序厂商 ID）。读取时按 schema 0 迁移。

use super::{KeyValueStore, StoreError};
use crate::device::{DeviceRecord, DeviceStatus};
use base64::Engine;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub const DEVICES_KEY: &str = "devices";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    schema_version: u32,
    devices: Vec<DeviceRecord>,
}

#[derive(Clone)]
pub struct DeviceStore {
    kv: Arc<dyn KeyValueStore>,
}

impl DeviceStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// 读取快照，不存在时返回空列表
    pub async fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        match self.kv.get(DEVICES_KEY).await? {
            Some(raw) => {
                let devices = decode(&raw)?;
                debug!("Loaded {} stored device(s)", devices.len());
                Ok(devices)
            }
            None => Ok(Vec::new()),
        }
    }

    pub async fn save(&self, devices: &[DeviceRecord]) -> Result<(), StoreError> {
        let raw = encode(devices)?;
        self.kv.set(DEVICES_KEY, raw).await
    }
}

pub fn encode(devices: &[DeviceRecord]) -> Result<String, StoreError> {
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        devices: devices.to_vec(),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// 解码并迁移快照；过渡状态被折算为稳定状态
pub fn decode(raw: &str) -> Result<Vec<DeviceRecord>, StoreError> {
    let value: Value = serde_json::from_str(raw)?;

    let mut devices = match value {
        Value::Array(items) => {
            info!("Migrating unversioned device snapshot ({} entries)", items.len());
            migrate_legacy(items)
        }
        Value::Object(mut map) => {
            let version = map
                .get("schemaVersion")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0);
            match version {
                0 => match map.remove("devices") {
                    Some(Value::Array(items)) => migrate_legacy(items),
                    _ => Vec::new(),
                },
                SCHEMA_VERSION => {
                    serde_json::from_value::<Envelope>(Value::Object(map))?.devices
                }
                other => return Err(StoreError::UnsupportedVersion(other)),
            }
        }
        other => {
            return Err(StoreError::Malformed(format!(
                "expected array or object, got {other}"
            )));
        }
    };

    for device in &mut devices {
        device.status = device.status.settled();
    }
    Ok(devices)
}

fn migrate_legacy(items: Vec<Value>) -> Vec<DeviceRecord> {
    items
        .into_iter()
        .filter_map(|item| {
            let record = migrate_entry(&item);
            if record.is_none() {
                warn!("Dropping stored device without id: {}", item);
            }
            record
        })
        .collect()
}

fn migrate_entry(item: &Value) -> Option<DeviceRecord> {
    let id = item.get("id")?.as_str()?.to_string();

    let status = item
        .get("status")
        .and_then(Value::as_str)
        .and_then(DeviceStatus::from_label)
        .unwrap_or_default();

    let service_uuids = item
        .get("serviceUUIDs")
        .or_else(|| item.get("serviceUuids"))
        .and_then(Value::as_array)
        .map(|uuids| {
            uuids
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect()
        })
        .unwrap_or_default();

    Some(DeviceRecord {
        id,
        name: item.get("name").and_then(Value::as_str).map(String::from),
        is_connectable: item.get("isConnectable").and_then(Value::as_bool),
        rssi: int_field(item, "rssi"),
        tx_power_level: int_field(item, "txPowerLevel"),
        manufacturer_data: item
            .get("manufacturerData")
            .map(legacy_manufacturer_data)
            .unwrap_or_default(),
        service_uuids,
        status,
    })
}

fn int_field(item: &Value, key: &str) -> Option<i16> {
    item.get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i16::try_from(v).ok())
}

fn legacy_manufacturer_data(value: &Value) -> BTreeMap<u16, Vec<u8>> {
    match value {
        Value::String(encoded) => {
            let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
                warn!("Ignoring undecodable manufacturer data: {}", encoded);
                return BTreeMap::new();
            };
            if bytes.len() < 2 {
                return BTreeMap::new();
            }
            let company_id = u16::from_le_bytes([bytes[0], bytes[1]]);
            BTreeMap::from([(company_id, bytes[2..].to_vec())])
        }
        Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_default(),
        _ => BTreeMap::new(),
    }
}
