//! BLE Scanner - 把 btleplug 的 CentralEvent 流转换为广播流
//!
//! 设备以 BD 地址作为 id。`DeviceDiscovered`、`DeviceUpdated` 以及三种
//! 广播数据事件都会触发一次属性读取，产出该设备最新的完整广播。

use super::{AdvertisementStream, BleError};
use crate::device::Advertisement;
use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use futures_util::StreamExt;
use log::{debug, info, trace};

pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    pub async fn start(&self) -> Result<AdvertisementStream, BleError> {
        // 先订阅事件再开始扫描，避免漏掉最早的广播
        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BleError::Scan(e.to_string()))?;
        info!("BLE scan started");

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    CentralEvent::ManufacturerDataAdvertisement { id, .. }
                    | CentralEvent::ServiceDataAdvertisement { id, .. }
                    | CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => return None,
                };
                match read_advertisement(&adapter, &id).await {
                    Ok(adv) => adv.map(Ok),
                    Err(e) => {
                        // 设备可能在事件到达前已被 BlueZ 移除
                        debug!("Skipping advertisement for {:?}: {}", id, e);
                        None
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    pub async fn stop(&self) -> Result<(), BleError> {
        self.adapter.stop_scan().await?;
        info!("BLE scan stopped");
        Ok(())
    }
}

async fn read_advertisement(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<Option<Advertisement>, BleError> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };

    trace!(
        "Advertisement {}: name={:?}, rssi={:?}, m_data={}, services={}",
        props.address,
        props.local_name,
        props.rssi,
        props.manufacturer_data.len(),
        props.services.len()
    );

    Ok(Some(Advertisement {
        id: props.address.to_string(),
        name: props.local_name,
        // btleplug 不暴露可连接标志
        is_connectable: None,
        rssi: props.rssi,
        tx_power_level: props.tx_power_level,
        manufacturer_data: props.manufacturer_data.into_iter().collect(),
        service_uuids: props.services,
    }))
}
