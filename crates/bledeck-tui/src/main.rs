//! BleDeck TUI - 交互式终端界面
//!
//! 使用 ratatui 展示周期扫描发现的 BLE 设备，并提供连接 / 移除操作。
//!
//! # 日志
//!
//! 日志默认显示在 TUI 的"日志"标签页中。
//! 如需输出到文件进行调试，设置 RUST_LOG 环境变量：
//!
//! ```bash
//! RUST_LOG=debug cargo run -p bledeck-tui 2>> /tmp/bledeck.log
//! ```

mod app;
mod tui_log;
mod ui;

use anyhow::Result;
use bledeck_core::{AppSettings, Notice, ScanCoordinator};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use app::{App, AppEvent, AppMode, Tab};
use tui_log::TuiLogLayer;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = AppSettings::load();

    // 协调器在进入备用屏幕之前创建，失败时错误直接打印到终端
    let (coordinator, notices) = ScanCoordinator::system(&settings).await?;
    let app = App::new(coordinator.clone(), settings);

    // 初始化日志系统，发送到 TUI 日志面板
    init_logging(app.event_tx.clone(), app.settings.verbose);

    let notice_task = tokio::spawn(forward_notices(notices, app.event_tx.clone()));
    let scan_task = coordinator.spawn();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    coordinator.shutdown().await;
    if let Err(e) = scan_task.await {
        tracing::warn!("Scan task ended abnormally: {}", e);
    }
    notice_task.abort();

    res
}

/// 初始化日志系统
///
/// - 总是将日志发送到 TUI 日志面板
/// - 如果设置了 RUST_LOG，同时输出到 stderr（用于调试）
fn init_logging(log_tx: mpsc::Sender<AppEvent>, verbose: bool) {
    // 桥接 log crate（bledeck-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let tui_layer = TuiLogLayer::new(log_tx);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,bledeck_core=trace")
        } else {
            EnvFilter::new("info,bledeck_core=debug")
        }
    });

    if std::env::var("RUST_LOG").is_ok() {
        use tracing_subscriber::fmt;

        let stderr_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tui_layer)
            .with(stderr_layer)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tui_layer)
            .try_init();
    }
}

async fn forward_notices(mut notices: mpsc::UnboundedReceiver<Notice>, tx: mpsc::Sender<AppEvent>) {
    while let Some(notice) = notices.recv().await {
        if tx.send(AppEvent::Notice(notice)).await.is_err() {
            break;
        }
    }
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, mut app: App) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, &app))?;

        // 使用 poll 避免无限阻塞
        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            // 提示弹窗拦截所有按键以关闭它
            if app.notice.is_some() {
                app.dismiss_notice();
                continue;
            }

            match app.mode {
                AppMode::ActionMenu { .. } => match key.code {
                    KeyCode::Esc | KeyCode::Char('q') => app.close_overlay(),
                    KeyCode::Up | KeyCode::Char('k') => app.menu_previous(),
                    KeyCode::Down | KeyCode::Char('j') => app.menu_next(),
                    KeyCode::Enter => app.confirm_action(),
                    _ => {}
                },
                AppMode::Detail { .. } => match key.code {
                    KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => app.close_overlay(),
                    KeyCode::Char('r') => app.disconnect_shown(),
                    _ => {}
                },
                AppMode::Browse => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        return Ok(());
                    }
                    KeyCode::Char('s') => app.start_scan(),
                    KeyCode::Char('x') => app.stop_scan(),
                    KeyCode::Char('u') => app.toggle_unnamed(),
                    KeyCode::Char('o') => app.open_settings(),
                    KeyCode::Char('w') => app.retry_persist(),
                    KeyCode::Up | KeyCode::Char('k') => app.previous_device(),
                    KeyCode::Down | KeyCode::Char('j') => app.next_device(),
                    KeyCode::Enter if app.tab == Tab::Devices => app.open_menu(),
                    KeyCode::Tab => app.next_tab(),
                    KeyCode::Char('1') => app.tab = Tab::Devices,
                    KeyCode::Char('2') => app.tab = Tab::Log,
                    KeyCode::Char('d') => app.toggle_log_level(),
                    KeyCode::Char('c') => app.clear_logs(),
                    _ => {}
                },
            }
        }

        // 处理后台事件，同步设备列表
        app.tick();
    }
}
