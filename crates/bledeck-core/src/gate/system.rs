//! 桌面平台的权限实现
//!
//! Linux 没有运行时授权模型，BLE 扫描所需的 `CAP_NET_RAW` 在安装时通过
//! `cargo xtask setup-caps` 设置。

use super::permissions::{Permission, PermissionOutcome, PermissionProvider, Platform};
use log::debug;
use std::collections::HashMap;
use tokio::process::Command;

/// 打开蓝牙设置面板的候选命令
const SETTINGS_COMMANDS: &[(&str, &[&str])] = &[
    ("gnome-control-center", &["bluetooth"]),
    ("blueman-manager", &[]),
    ("systemsettings", &["kcm_bluetooth"]),
];

#[derive(Debug, Default)]
pub struct SystemPermissions;

impl SystemPermissions {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl PermissionProvider for SystemPermissions {
    fn platform(&self) -> Platform {
        Platform::Implicit
    }

    async fn request(&self, _permission: Permission) -> PermissionOutcome {
        PermissionOutcome::Granted
    }

    async fn request_multiple(
        &self,
        permissions: &[Permission],
    ) -> HashMap<Permission, PermissionOutcome> {
        permissions
            .iter()
            .map(|p| (*p, PermissionOutcome::Granted))
            .collect()
    }

    async fn location_services_enabled(&self) -> bool {
        true
    }

    async fn open_settings(&self) -> std::io::Result<()> {
        let mut last_error = None;
        for (program, args) in SETTINGS_COMMANDS {
            match Command::new(program).args(*args).spawn() {
                Ok(_) => {
                    debug!("Opened Bluetooth settings with {}", program);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| std::io::Error::other("no settings application")))
    }
}
