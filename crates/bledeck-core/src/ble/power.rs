//! 适配器电源管理
//!
//! btleplug 不能打开适配器电源，这部分通过 bluer (BlueZ D-Bus) 完成。

use super::{AdapterState, BleError, StateStream};
use bluer::{AdapterEvent, AdapterProperty};
use futures_util::{Stream, StreamExt, stream};
use log::{debug, info};

pub struct AdapterPower {
    _session: bluer::Session,
    adapter: bluer::Adapter,
}

impl AdapterPower {
    pub async fn new() -> Result<Self, BleError> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        debug!("Using adapter '{}' for power management", adapter.name());
        Ok(Self {
            _session: session,
            adapter,
        })
    }

    pub async fn state(&self) -> Result<AdapterState, BleError> {
        let powered = self.adapter.is_powered().await?;
        Ok(if powered {
            AdapterState::PoweredOn
        } else {
            AdapterState::PoweredOff
        })
    }

    pub async fn power_on(&self) -> Result<(), BleError> {
        info!("Powering on adapter '{}'", self.adapter.name());
        self.adapter
            .set_powered(true)
            .await
            .map_err(|e| BleError::Adapter(e.to_string()))
    }

    /// 电源状态变化流；流被丢弃时 BlueZ 事件订阅随之释放
    pub async fn watch(&self, emit_current: bool) -> Result<StateStream, BleError> {
        let events = self.adapter.events().await?;
        let current = if emit_current {
            Some(self.state().await?)
        } else {
            None
        };
        Ok(power_changes(events, current))
    }
}

/// 把适配器事件流过滤为电源状态流，`current` 先于事件产出
pub(crate) fn power_changes<S>(events: S, current: Option<AdapterState>) -> StateStream
where
    S: Stream<Item = AdapterEvent> + Send + 'static,
{
    let changes = events.filter_map(|event| async move {
        match event {
            AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                let state = if powered {
                    AdapterState::PoweredOn
                } else {
                    AdapterState::PoweredOff
                };
                debug!("Adapter power changed: {}", state);
                Some(state)
            }
            _ => None,
        }
    });
    stream::iter(current).chain(changes).boxed()
}
