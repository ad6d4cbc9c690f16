//! Linux 上的 `BleCentral` 实现

use super::{
    AdapterPower, AdapterState, AdvertisementStream, BleCentral, BleClient, BleError, BleScanner,
    StateStream,
};
use btleplug::api::Manager as _;
use btleplug::platform::Manager;

pub struct SystemBle {
    power: AdapterPower,
    scanner: BleScanner,
    client: BleClient,
}

impl SystemBle {
    pub async fn new() -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(BleError::NoAdapter)?;
        let power = AdapterPower::new().await?;

        Ok(Self {
            power,
            scanner: BleScanner::new(adapter.clone()),
            client: BleClient::new(adapter),
        })
    }
}

#[async_trait::async_trait]
impl BleCentral for SystemBle {
    async fn state(&self) -> Result<AdapterState, BleError> {
        self.power.state().await
    }

    async fn enable(&self) -> Result<(), BleError> {
        self.power.power_on().await
    }

    async fn state_changes(&self, emit_current: bool) -> Result<StateStream, BleError> {
        self.power.watch(emit_current).await
    }

    async fn start_scan(&self) -> Result<AdvertisementStream, BleError> {
        self.scanner.start().await
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        self.scanner.stop().await
    }

    async fn connect(&self, id: &str) -> Result<(), BleError> {
        self.client.connect(id).await
    }

    async fn discover_services(&self, id: &str) -> Result<(), BleError> {
        self.client.discover_services(id).await
    }

    async fn disconnect(&self, id: &str) -> Result<(), BleError> {
        self.client.disconnect(id).await
    }
}
