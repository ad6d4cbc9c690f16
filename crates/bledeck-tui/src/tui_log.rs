//! TUI 日志层
//!
//! 自定义 tracing Layer，将日志发送到 TUI 的日志面板。

use crate::app::AppEvent;
use bledeck_core::LogLevel;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

pub struct TuiLogLayer {
    tx: mpsc::Sender<AppEvent>,
}

impl TuiLogLayer {
    pub fn new(tx: mpsc::Sender<AppEvent>) -> Self {
        Self { tx }
    }
}

fn level_of(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        Level::TRACE => LogLevel::Trace,
    }
}

impl<S> Layer<S> for TuiLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.finish(metadata.target());

        // 面板满时丢弃，不阻塞调用方
        let _ = self.tx.try_send(AppEvent::LogMessage {
            level: level_of(metadata.level()),
            message,
        });
    }
}

/// 提取 `message` 字段，其余字段以 `key=value` 追加
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self, target: &str) -> String {
        let mut out = if self.message.is_empty() {
            target.to_string()
        } else {
            self.message
        };
        for field in self.fields {
            out.push(' ');
            out.push_str(&field);
        }
        out
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            // tracing-log 桥接附带的元数据字段
            name if name.starts_with("log.") => {}
            name => self.fields.push(format!("{}={:?}", name, value)),
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            name if name.starts_with("log.") => {}
            name => self.fields.push(format!("{}={}", name, value)),
        }
    }
}
