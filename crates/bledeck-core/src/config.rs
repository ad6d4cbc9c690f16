//! 应用配置和持久化
//!
//! 提供扫描节奏、权限请求和数据目录等设置的存储和读取。

use crate::coordinator::CoordinatorOptions;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 每个扫描窗口的时长（秒）
    pub scan_window_secs: u64,
    /// 两个扫描窗口之间的空闲时长（秒）
    pub rescan_interval_secs: u64,
    /// API >= 31 时是否在批量请求中附带精确定位权限
    pub request_fine_location: bool,
    /// 设备快照存放目录
    pub data_dir: PathBuf,
    /// 列表中是否显示未命名设备
    pub show_unnamed: bool,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            scan_window_secs: 5,
            rescan_interval_secs: 5,
            request_fine_location: true,
            data_dir: default_data_dir(),
            show_unnamed: false,
            verbose: false,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bledeck");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 转换为协调器参数，时长最少 1 秒
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            scan_window: Duration::from_secs(self.scan_window_secs.max(1)),
            rescan_interval: Duration::from_secs(self.rescan_interval_secs.max(1)),
            request_fine_location: self.request_fine_location,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bledeck")
}
