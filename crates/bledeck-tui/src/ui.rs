//! UI rendering module

use bledeck_core::{DeviceRecord, DeviceStatus, LogLevel, Severity};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Tabs, Wrap},
};

use crate::app::{ACTIONS, App, AppMode, Tab};

pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),   // Main content
            Constraint::Length(3), // Status bar
        ])
        .split(frame.area());

    draw_header(frame, app, chunks[0]);
    draw_main(frame, app, chunks[1]);
    draw_status_bar(frame, app, chunks[2]);

    match &app.mode {
        AppMode::ActionMenu { highlight, .. } => draw_action_menu(frame, app, *highlight),
        AppMode::Detail { .. } => draw_detail(frame, app),
        AppMode::Browse => {}
    }

    // 提示弹窗总在最上层
    if app.notice.is_some() {
        draw_notice(frame, app);
    }
}

fn draw_header(frame: &mut Frame, app: &App, area: Rect) {
    let titles = vec!["设备 [1]", "日志 [2]"];
    let selected = match app.tab {
        Tab::Devices => 0,
        Tab::Log => 1,
    };

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title(" BleDeck "))
        .select(selected)
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Yellow).bold());

    frame.render_widget(tabs, area);
}

fn draw_main(frame: &mut Frame, app: &App, area: Rect) {
    match app.tab {
        Tab::Devices => draw_devices_tab(frame, app, area),
        Tab::Log => draw_log_tab(frame, app, area),
    }
}

fn status_color(status: DeviceStatus) -> Color {
    match status {
        DeviceStatus::Unpaired => Color::Gray,
        DeviceStatus::Connecting | DeviceStatus::Disconnecting => Color::Yellow,
        DeviceStatus::Connected => Color::Green,
        DeviceStatus::Disconnected => Color::Cyan,
    }
}

fn device_line(dev: &DeviceRecord) -> Line<'_> {
    let rssi_bar = dev.rssi.map_or("····", rssi_to_bar);
    Line::from(vec![
        Span::raw(format!("{} ", dev.display_name())),
        Span::styled(rssi_bar, Style::default().fg(Color::Blue)),
        Span::raw(" "),
        Span::styled(
            format!("[{}]", dev.status),
            Style::default().fg(status_color(dev.status)),
        ),
    ])
}

fn draw_devices_tab(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let items: Vec<ListItem> = app
        .devices
        .iter()
        .enumerate()
        .map(|(i, dev)| {
            let style = if i == app.selected_device {
                Style::default().bg(Color::DarkGray).fg(Color::White)
            } else {
                Style::default()
            };
            ListItem::new(device_line(dev)).style(style)
        })
        .collect();

    let title = if app.scanning {
        " 🔍 扫描中... "
    } else {
        " 📡 附近设备 "
    };

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD));

    frame.render_widget(list, chunks[0]);

    let help_text = match app.selected() {
        None => "等待扫描结果...\n\n按 's' 立即扫描\n按 'u' 显示未命名设备\n按 'q' 退出".to_string(),
        Some(dev) => format!(
            "{}\n{}\n状态: {}\n\n↑/↓ 选择设备\nEnter 操作菜单\n's' 扫描  'x' 停止\n'o' 打开系统设置",
            dev.display_name(),
            dev.id,
            dev.status
        ),
    };

    let help = Paragraph::new(help_text)
        .block(Block::default().borders(Borders::ALL).title(" 帮助 "))
        .wrap(Wrap { trim: true });

    frame.render_widget(help, chunks[1]);
}

fn draw_log_tab(frame: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let visible: Vec<_> = app.visible_logs().collect();
    let items: Vec<ListItem> = visible
        .iter()
        .skip(visible.len().saturating_sub(height))
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Error => Color::Red,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Info => Color::White,
                LogLevel::Debug | LogLevel::Trace => Color::DarkGray,
            };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:5} ", entry.level), Style::default().fg(color)),
                Span::raw(entry.message.as_str()),
            ]))
        })
        .collect();

    let title = format!(" 📋 日志 ({}) [d]级别 [c]清空 ", app.log_filter);
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));

    frame.render_widget(list, area);
}

fn draw_action_menu(frame: &mut Frame, app: &App, highlight: usize) {
    let Some(device) = app.shown() else {
        return;
    };
    let area = centered_rect(40, 30, frame.area());

    let items: Vec<ListItem> = ACTIONS
        .iter()
        .enumerate()
        .map(|(i, action)| {
            let style = if i == highlight {
                Style::default().bg(Color::DarkGray).fg(Color::White).bold()
            } else {
                Style::default()
            };
            ListItem::new(action.label()).style(style)
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", device.display_name())),
    );

    frame.render_widget(Clear, area);
    frame.render_widget(list, area);
}

fn draw_detail(frame: &mut Frame, app: &App) {
    let Some(device) = app.shown() else {
        return;
    };
    let area = centered_rect(70, 70, frame.area());

    let lines: Vec<Line> = device
        .fields()
        .into_iter()
        .map(|(key, value)| {
            Line::from(vec![
                Span::styled(format!("{key}: "), Style::default().fg(Color::Yellow)),
                Span::raw(value),
            ])
        })
        .collect();

    let detail = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} [r]断开 [Esc]关闭 ", device.display_name())),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, area);
    frame.render_widget(detail, area);
}

fn draw_notice(frame: &mut Frame, app: &App) {
    let Some(notice) = &app.notice else {
        return;
    };
    let area = centered_rect(50, 25, frame.area());
    let color = match notice.severity {
        Severity::Info => Color::Cyan,
        Severity::Warning => Color::Yellow,
        Severity::Error => Color::Red,
    };

    let popup = Paragraph::new(format!("{}\n\n按任意键关闭", notice.message))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color))
                .title(format!(" {} ", notice.title)),
        )
        .wrap(Wrap { trim: true });

    frame.render_widget(Clear, area);
    frame.render_widget(popup, area);
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let mode_text = if app.scanning {
        " 🔍 扫描中 "
    } else {
        " ⏸️  空闲 "
    };
    let dirty = if app.coordinator.is_dirty() {
        " │ ⚠ 未保存 [w]重试"
    } else {
        ""
    };

    let status = Paragraph::new(format!(
        "{}│ 设备: {} │ {}{} │ [Tab]切换 [q]退出",
        mode_text,
        app.devices.len(),
        app.status_message,
        dirty
    ))
    .block(Block::default().borders(Borders::ALL));

    frame.render_widget(status, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn rssi_to_bar(rssi: i16) -> &'static str {
    if rssi > -50 {
        "████"
    } else if rssi > -60 {
        "███░"
    } else if rssi > -70 {
        "██░░"
    } else if rssi > -80 {
        "█░░░"
    } else {
        "░░░░"
    }
}
