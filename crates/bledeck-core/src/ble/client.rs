//! BLE Client - 按地址连接、发现服务、断开

use super::BleError;
use btleplug::api::{Central, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use log::{debug, info};
use std::time::Duration;
use tokio::time;

pub struct BleClient {
    adapter: Adapter,
}

impl BleClient {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    pub async fn connect(&self, address: &str) -> Result<(), BleError> {
        let peripheral = self.find_device(address).await?;
        if peripheral.is_connected().await? {
            debug!("{} already connected", address);
            return Ok(());
        }

        info!("Connecting to {}", address);
        peripheral
            .connect()
            .await
            .map_err(|e| BleError::ConnectionFailed(e.to_string()))?;

        // 等待连接稳定
        time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    pub async fn discover_services(&self, address: &str) -> Result<(), BleError> {
        let peripheral = self.find_device(address).await?;
        info!("Discovering services on {}...", address);
        peripheral
            .discover_services()
            .await
            .map_err(|e| BleError::ConnectionFailed(e.to_string()))?;

        let services = peripheral.services();
        let characteristics: usize = services.iter().map(|s| s.characteristics.len()).sum();
        info!(
            "{}: {} service(s), {} characteristic(s)",
            address,
            services.len(),
            characteristics
        );
        Ok(())
    }

    pub async fn disconnect(&self, address: &str) -> Result<(), BleError> {
        let peripheral = self.find_device(address).await?;
        info!("Disconnecting from {}", address);
        peripheral
            .disconnect()
            .await
            .map_err(|e| BleError::DisconnectFailed(e.to_string()))
    }

    async fn find_device(&self, address: &str) -> Result<Peripheral, BleError> {
        let peripherals = self.adapter.peripherals().await?;

        for peripheral in peripherals {
            if let Some(props) = peripheral.properties().await?
                && props.address.to_string().eq_ignore_ascii_case(address)
            {
                return Ok(peripheral);
            }
        }

        Err(BleError::DeviceNotFound(address.to_string()))
    }
}
