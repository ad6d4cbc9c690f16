//! Application state

use bledeck_core::{
    AppSettings, DeviceRecord, LogEntry, LogLevel, Notice, ScanCoordinator, Severity,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const MAX_LOGS: usize = 500;

/// 设备操作菜单
pub const ACTIONS: [Action; 3] = [Action::Connect, Action::Remove, Action::Details];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect,
    Remove,
    Details,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Connect => "连接 (Connect)",
            Action::Remove => "移除 (Remove)",
            Action::Details => "详情 (Details)",
        }
    }
}

/// 弹窗记住的是设备 id，列表重排后仍指向同一台设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMode {
    Browse,
    /// 操作菜单，附带当前高亮项
    ActionMenu { id: String, highlight: usize },
    Detail { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tab {
    Devices,
    Log,
}

/// 后台任务发给界面的事件
#[derive(Debug)]
pub enum AppEvent {
    LogMessage { level: LogLevel, message: String },
    Notice(Notice),
}

pub struct App {
    pub coordinator: Arc<ScanCoordinator>,
    pub settings: AppSettings,
    pub mode: AppMode,
    pub tab: Tab,
    pub devices: Vec<DeviceRecord>,
    pub selected_device: usize,
    /// 光标所在设备，刷新列表时据此重新定位 `selected_device`
    selected_id: Option<String>,
    pub scanning: bool,
    pub logs: Vec<LogEntry>,
    pub log_filter: LogLevel,
    /// 当前弹出的提示，任意键关闭
    pub notice: Option<Notice>,
    pub status_message: String,
    pub event_tx: mpsc::Sender<AppEvent>,
    event_rx: mpsc::Receiver<AppEvent>,
    devices_rx: watch::Receiver<Vec<DeviceRecord>>,
    scanning_rx: watch::Receiver<bool>,
}

impl App {
    pub fn new(coordinator: Arc<ScanCoordinator>, settings: AppSettings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1000);
        let devices_rx = coordinator.devices();
        let scanning_rx = coordinator.scanning();
        let log_filter = if settings.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };

        let mut app = Self {
            coordinator,
            settings,
            mode: AppMode::Browse,
            tab: Tab::Devices,
            devices: Vec::new(),
            selected_device: 0,
            selected_id: None,
            scanning: false,
            logs: Vec::new(),
            log_filter,
            notice: None,
            status_message: "就绪".to_string(),
            event_tx,
            event_rx,
            devices_rx,
            scanning_rx,
        };
        app.add_log(LogLevel::Info, "BleDeck TUI 启动");
        app.add_log(
            LogLevel::Info,
            "按 Enter 打开设备菜单, 's' 立即扫描, 'q' 退出",
        );
        app.refresh_devices();
        app
    }

    pub fn add_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry::new(level, message));
        if self.logs.len() > MAX_LOGS {
            let excess = self.logs.len() - MAX_LOGS;
            self.logs.drain(..excess);
        }
    }

    pub fn visible_logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs
            .iter()
            .filter(move |entry| entry.visible_at(self.log_filter))
    }

    pub fn toggle_log_level(&mut self) {
        self.log_filter = self.log_filter.toggled();
        self.status_message = format!("日志级别: {}", self.log_filter);
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    pub fn selected(&self) -> Option<&DeviceRecord> {
        self.devices.get(self.selected_device)
    }

    pub fn device(&self, id: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// 菜单或详情弹窗对应的设备
    pub fn shown(&self) -> Option<&DeviceRecord> {
        match &self.mode {
            AppMode::ActionMenu { id, .. } | AppMode::Detail { id } => self.device(id),
            AppMode::Browse => None,
        }
    }

    pub fn next_device(&mut self) {
        if !self.devices.is_empty() {
            self.selected_device = (self.selected_device + 1) % self.devices.len();
            self.selected_id = self.selected().map(|d| d.id.clone());
        }
    }

    pub fn previous_device(&mut self) {
        if !self.devices.is_empty() {
            self.selected_device = self
                .selected_device
                .checked_sub(1)
                .unwrap_or(self.devices.len() - 1);
            self.selected_id = self.selected().map(|d| d.id.clone());
        }
    }

    pub fn next_tab(&mut self) {
        self.tab = match self.tab {
            Tab::Devices => Tab::Log,
            Tab::Log => Tab::Devices,
        };
    }

    pub fn open_menu(&mut self) {
        if let Some(device) = self.selected() {
            self.mode = AppMode::ActionMenu {
                id: device.id.clone(),
                highlight: 0,
            };
        }
    }

    pub fn menu_next(&mut self) {
        if let AppMode::ActionMenu { highlight, .. } = &mut self.mode {
            *highlight = (*highlight + 1) % ACTIONS.len();
        }
    }

    pub fn menu_previous(&mut self) {
        if let AppMode::ActionMenu { highlight, .. } = &mut self.mode {
            *highlight = highlight.checked_sub(1).unwrap_or(ACTIONS.len() - 1);
        }
    }

    /// 执行菜单中高亮的操作
    pub fn confirm_action(&mut self) {
        let AppMode::ActionMenu { id, highlight } = &self.mode else {
            return;
        };
        let action = ACTIONS[*highlight];
        let Some(device) = self.device(id).cloned() else {
            self.mode = AppMode::Browse;
            return;
        };

        match action {
            Action::Connect => {
                self.mode = AppMode::Browse;
                self.run_pair(device);
            }
            Action::Remove => {
                self.mode = AppMode::Browse;
                self.run_unpair(device);
            }
            Action::Details => self.mode = AppMode::Detail { id: device.id },
        }
    }

    /// 详情弹窗中断开当前设备
    pub fn disconnect_shown(&mut self) {
        if !matches!(self.mode, AppMode::Detail { .. }) {
            return;
        }
        let device = self.shown().cloned();
        self.mode = AppMode::Browse;
        if let Some(device) = device {
            self.run_unpair(device);
        }
    }

    pub fn close_overlay(&mut self) {
        self.mode = AppMode::Browse;
    }

    fn run_pair(&mut self, device: DeviceRecord) {
        self.status_message = format!("正在连接 {}...", device.display_name());
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            match coordinator.pair(&device.id).await {
                Ok(()) => tracing::info!("Connected to {}", device.display_name()),
                Err(e) => tracing::debug!("pair {} failed: {}", device.id, e),
            }
        });
    }

    fn run_unpair(&mut self, device: DeviceRecord) {
        self.status_message = format!("正在断开 {}...", device.display_name());
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            match coordinator.unpair(&device.id).await {
                Ok(()) => tracing::info!("Disconnected from {}", device.display_name()),
                Err(e) => tracing::debug!("unpair {} failed: {}", device.id, e),
            }
        });
    }

    pub fn start_scan(&mut self) {
        self.coordinator.start_scanning();
        self.status_message = "开始扫描附近设备...".to_string();
    }

    pub fn stop_scan(&mut self) {
        self.coordinator.stop_scanning();
        self.status_message = "已停止当前扫描".to_string();
    }

    pub fn toggle_unnamed(&mut self) {
        self.settings.show_unnamed = !self.settings.show_unnamed;
        if let Err(e) = self.settings.save() {
            self.add_log(LogLevel::Warn, format!("保存设置失败: {e}"));
        }
        self.refresh_devices();
        self.status_message = if self.settings.show_unnamed {
            "显示未命名设备".to_string()
        } else {
            "隐藏未命名设备".to_string()
        };
    }

    pub fn open_settings(&mut self) {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            coordinator.gate().open_settings().await;
        });
    }

    /// 上次保存失败后重试
    pub fn retry_persist(&mut self) {
        if !self.coordinator.is_dirty() {
            return;
        }
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            match coordinator.persist_now().await {
                Ok(()) => tracing::info!("Device statuses saved"),
                Err(e) => tracing::warn!("Retry failed: {}", e),
            }
        });
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    fn refresh_devices(&mut self) {
        let show_unnamed = self.settings.show_unnamed;
        self.devices = self
            .devices_rx
            .borrow_and_update()
            .iter()
            .filter(|d| show_unnamed || d.is_listed())
            .cloned()
            .collect();

        let cursor = self
            .selected_id
            .as_ref()
            .and_then(|id| self.devices.iter().position(|d| &d.id == id));
        match cursor {
            Some(index) => self.selected_device = index,
            None if self.selected_device >= self.devices.len() => {
                self.selected_device = self.devices.len().saturating_sub(1);
            }
            None => {}
        }
        self.selected_id = self.selected().map(|d| d.id.clone());

        if self.mode != AppMode::Browse && self.shown().is_none() {
            self.mode = AppMode::Browse;
        }
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::LogMessage { level, message } => self.add_log(level, message),
            AppEvent::Notice(notice) => {
                if notice.severity != Severity::Info {
                    self.status_message = notice.title.clone();
                }
                self.notice = Some(notice);
            }
        }
    }

    /// 处理后台事件并同步注册表
    pub fn tick(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event);
        }

        if self.devices_rx.has_changed().unwrap_or(false) {
            self.refresh_devices();
        }
        if self.scanning_rx.has_changed().unwrap_or(false) {
            self.scanning = *self.scanning_rx.borrow_and_update();
        }
    }
}
