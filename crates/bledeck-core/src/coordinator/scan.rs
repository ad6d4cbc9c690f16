//! 扫描窗口与周期调度
//!
//! 状态机：
//!
//! ```text
//! Idle --(就绪检查通过)--> Scanning --(计时结束 / stop)--> Idle --(冷却)--> Scanning ...
//!                             |
//!                             +--(适配器关闭)--> Idle，等待适配器重新上电
//! ```

use super::{CoordinatorError, ScanCoordinator, WindowOutcome};
use crate::ble::AdapterState;
use crate::device::Advertisement;
use crate::gate::NotReady;
use crate::registry::MergeOutcome;
use futures_util::{StreamExt, stream};
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// 一个窗口结束后如何进入下一个窗口
enum Resume {
    AfterCooldown,
    WhenPoweredOn,
    OnRequest,
}

impl ScanCoordinator {
    /// 启动周期扫描任务：先恢复存储的注册表，然后循环执行扫描窗口
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// 请求立即开始扫描（唤醒处于冷却或等待中的周期任务）
    ///
    /// 窗口进行中时忽略，否则留下的许可会让下一次冷却直接跳过
    pub fn start_scanning(&self) {
        if self.is_scanning() {
            debug!("Scan requested while already scanning");
            return;
        }
        debug!("Scan requested");
        self.start_signal.notify_one();
    }

    /// 提前结束当前窗口；周期任务仍会在冷却后继续
    pub fn stop_scanning(&self) {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = window.as_ref() {
            token.cancel();
        }
    }

    /// 执行一个完整的扫描窗口（含就绪检查和窗口结束后的持久化）
    pub async fn scan_window(&self) -> Result<WindowOutcome, CoordinatorError> {
        self.ensure_alive()?;
        self.gate.check().await?;
        self.ensure_alive()?;

        let Some(token) = self.try_begin_scan() else {
            debug!("Scan already in progress");
            return Ok(WindowOutcome::AlreadyScanning);
        };

        info!(
            "Starting BLE scan for {} seconds",
            self.options.scan_window.as_secs()
        );
        let result = self.run_window(&token).await;

        if let Err(e) = self.ble.stop_scan().await {
            debug!("stop_scan: {}", e);
        }
        self.end_scan();

        match &result {
            Ok(WindowOutcome::Cancelled) => {}
            Ok(outcome) => {
                info!("Scan window finished: {:?}", outcome);
                self.persist().await;
            }
            Err(e) => {
                self.notifier.warn("Scan failed", e.to_string());
                self.persist().await;
            }
        }
        result
    }

    async fn run_window(&self, token: &CancellationToken) -> Result<WindowOutcome, CoordinatorError> {
        let mut adverts = self
            .ble
            .start_scan()
            .await
            .map_err(CoordinatorError::Scan)?;
        let mut states = match self.ble.state_changes(false).await {
            Ok(states) => states,
            Err(e) => {
                warn!("Adapter state updates unavailable: {}", e);
                stream::pending().boxed()
            }
        };

        let deadline = time::sleep(self.options.scan_window);
        tokio::pin!(deadline);
        let mut advertisements = 0;

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    return Ok(if self.is_shut_down() {
                        WindowOutcome::Cancelled
                    } else {
                        info!("Scan stopped by request");
                        WindowOutcome::Stopped
                    });
                }
                () = &mut deadline => {
                    return Ok(WindowOutcome::Completed { advertisements });
                }
                Some(state) = states.next() => {
                    if state == AdapterState::PoweredOff {
                        self.notifier.warn(
                            "Bluetooth is turned off",
                            "Please turn on Bluetooth to continue scanning for devices.",
                        );
                        return Ok(WindowOutcome::PoweredOff);
                    }
                }
                item = adverts.next() => match item {
                    Some(Ok(adv)) => {
                        advertisements += 1;
                        self.ingest(adv).await;
                    }
                    Some(Err(e)) => {
                        warn!("Scan error: {}", e);
                        return Err(CoordinatorError::Scan(e));
                    }
                    None => {
                        debug!("Advertisement stream closed");
                        return Ok(WindowOutcome::Completed { advertisements });
                    }
                },
            }
        }
    }

    async fn ingest(&self, adv: Advertisement) {
        let id = adv.id.clone();
        if self.registry.merge(adv) == MergeOutcome::Inserted {
            debug!("New device {}", id);
        }

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return;
        }
        if let Some(record) = self.registry.get(&id) {
            for listener in listeners {
                listener.on_advertisement(&record).await;
            }
        }
    }

    fn try_begin_scan(&self) -> Option<CancellationToken> {
        let started = self.scanning.send_if_modified(|scanning| {
            if *scanning {
                false
            } else {
                *scanning = true;
                true
            }
        });
        if !started {
            return None;
        }
        let token = self.lifetime.child_token();
        *self.window.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Some(token)
    }

    fn end_scan(&self) {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.scanning.send_replace(false);
    }

    async fn run(&self) {
        if !self.loaded.load(Ordering::SeqCst)
            && let Err(e) = self.load().await
        {
            warn!("Failed to load device statuses: {}", e);
        }

        loop {
            let resume = match self.scan_window().await {
                Ok(WindowOutcome::Cancelled) | Err(CoordinatorError::ShutDown) => break,
                Ok(WindowOutcome::PoweredOff)
                | Err(CoordinatorError::NotReady(NotReady::AdapterUnavailable(_))) => {
                    Resume::WhenPoweredOn
                }
                Err(CoordinatorError::NotReady(reason)) => {
                    info!("Scanning paused until requested again: {}", reason);
                    Resume::OnRequest
                }
                Ok(_) | Err(_) => Resume::AfterCooldown,
            };

            let proceed = match resume {
                Resume::AfterCooldown => self.cooldown().await,
                Resume::WhenPoweredOn => self.wait_powered_on().await,
                Resume::OnRequest => self.wait_for_request().await,
            };
            if !proceed {
                break;
            }
        }

        info!("Periodic scanning stopped");
    }

    async fn cooldown(&self) -> bool {
        debug!(
            "Next scan in {} seconds",
            self.options.rescan_interval.as_secs()
        );
        tokio::select! {
            () = self.lifetime.cancelled() => false,
            () = time::sleep(self.options.rescan_interval) => true,
            () = self.start_signal.notified() => true,
        }
    }

    async fn wait_for_request(&self) -> bool {
        tokio::select! {
            () = self.lifetime.cancelled() => false,
            () = self.start_signal.notified() => true,
        }
    }

    async fn wait_powered_on(&self) -> bool {
        info!("Waiting for the Bluetooth adapter to power on");
        let mut states = match self.ble.state_changes(true).await {
            Ok(states) => states,
            Err(e) => {
                warn!("Adapter state updates unavailable: {}", e);
                return self.wait_for_request().await;
            }
        };

        loop {
            tokio::select! {
                () = self.lifetime.cancelled() => return false,
                () = self.start_signal.notified() => return true,
                state = states.next() => match state {
                    Some(AdapterState::PoweredOn) => {
                        info!("Adapter powered on, resuming scans");
                        return true;
                    }
                    Some(_) => {}
                    None => return self.wait_for_request().await,
                },
            }
        }
    }
}
