//! 面向用户的提示
//!
//! 核心库不直接弹窗，所有需要用户看到的失败都转换成 `Notice`，
//! 由前端（TUI 弹窗 / CLI stderr）决定如何展示。

use log::{error, info, warn};
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// 提示发送端，接收端关闭后静默丢弃
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, notice: Notice) {
        match notice.severity {
            Severity::Info => info!("{}", notice),
            Severity::Warning => warn!("{}", notice),
            Severity::Error => error!("{}", notice),
        }
        let _ = self.tx.send(notice);
    }

    pub fn info(&self, title: &str, message: impl Into<String>) {
        self.notify(Notice::new(Severity::Info, title, message));
    }

    pub fn warn(&self, title: &str, message: impl Into<String>) {
        self.notify(Notice::new(Severity::Warning, title, message));
    }

    pub fn error(&self, title: &str, message: impl Into<String>) {
        self.notify(Notice::new(Severity::Error, title, message));
    }
}
