//! BleDeck CLI
//!
//! 命令行前端，直接驱动扫描协调器：扫描、列出、配对和取消配对设备

use anyhow::{Context, Result};
use bledeck_core::{
    AppSettings, DeviceRecord, Notice, ScanCoordinator, Severity, WindowOutcome,
};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// 退出前等待剩余提示输出的最长时间
const NOTICE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "bledeck", version, about = "BLE 设备发现与配对工具")]
struct Cli {
    /// 详细日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描一个窗口并保存结果
    Scan {
        /// 扫描时长 (秒)，默认使用设置中的窗口时长
        #[arg(short, long)]
        timeout: Option<u64>,
        /// 同时列出未命名设备
        #[arg(short, long)]
        all: bool,
    },
    /// 列出已保存的设备
    List {
        #[arg(short, long)]
        all: bool,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 查看设备的全部字段
    Show {
        /// 设备地址
        id: String,
    },
    /// 连接设备
    Pair {
        id: String,
    },
    /// 断开并移除设备
    Unpair {
        id: String,
    },
    /// 周期扫描，持续输出设备变化 (Ctrl-C 退出)
    Watch {
        #[arg(short, long)]
        all: bool,
    },
    /// 查看或修改设置
    Settings {
        /// 形如 key=value，例如 scan_window_secs=8
        set: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = AppSettings::load();
    init_logging(cli.verbose || settings.verbose);

    match &cli.command {
        Commands::Settings { set } => return settings_command(&mut settings, set),
        Commands::Scan {
            timeout: Some(secs),
            ..
        } => settings.scan_window_secs = *secs,
        _ => {}
    }

    let (coordinator, notices) = ScanCoordinator::system(&settings).await?;
    let printer = tokio::spawn(print_notices(notices, io::stderr()));

    let result = async {
        coordinator
            .load()
            .await
            .context("Failed to load saved devices")?;
        run(&coordinator, cli.command).await
    }
    .await;

    finish(coordinator, printer).await;
    result
}

/// 关闭协调器，并等待已发出的提示全部打印
///
/// 提示通道的发送端归协调器所有，协调器释放后打印任务读完剩余提示即结束。
async fn finish<W>(coordinator: Arc<ScanCoordinator>, printer: JoinHandle<W>) -> Option<W> {
    coordinator.shutdown().await;
    drop(coordinator);

    match tokio::time::timeout(NOTICE_DRAIN_TIMEOUT, printer).await {
        Ok(Ok(out)) => Some(out),
        Ok(Err(e)) => {
            tracing::debug!("Notice printer failed: {}", e);
            None
        }
        Err(_) => {
            tracing::debug!("Notice channel still open, skipping remaining notices");
            None
        }
    }
}

/// 初始化日志，输出到 stderr
fn init_logging(verbose: bool) {
    // 桥接 log crate（bledeck-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default = if verbose {
        "debug,bledeck_core=trace"
    } else {
        "warn,bledeck_core=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

async fn print_notices<W: Write>(mut notices: mpsc::UnboundedReceiver<Notice>, mut out: W) -> W {
    while let Some(notice) = notices.recv().await {
        let icon = match notice.severity {
            Severity::Info => "ℹ️ ",
            Severity::Warning => "⚠️ ",
            Severity::Error => "❌",
        };
        let _ = writeln!(out, "{} {}", icon, notice);
    }
    out
}

async fn run(coordinator: &Arc<ScanCoordinator>, command: Commands) -> Result<()> {
    match command {
        Commands::Scan { all, .. } => {
            println!(
                "🔍 扫描设备 ({}s)...",
                coordinator.options().scan_window.as_secs()
            );
            match coordinator.scan_window().await? {
                WindowOutcome::Completed { advertisements } => {
                    tracing::debug!("{} advertisement(s) received", advertisements);
                }
                WindowOutcome::PoweredOff => println!("   蓝牙已关闭，扫描中止"),
                other => tracing::debug!("Scan ended: {:?}", other),
            }
            print_devices(&coordinator.registry().snapshot(), all);
        }
        Commands::List { all, json } => {
            let devices = coordinator.registry().snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                print_devices(&devices, all);
            }
        }
        Commands::Show { id } => {
            let device = coordinator
                .registry()
                .get(&id)
                .with_context(|| format!("Device not found: {id}"))?;
            println!("{}", device.display_name());
            for (key, value) in device.fields() {
                println!("   {key}: {value}");
            }
        }
        Commands::Pair { id } => {
            if !coordinator.registry().contains(&id) {
                println!("🔍 设备 {} 未保存，先扫描一次...", id);
                coordinator.scan_window().await?;
            }
            println!("🔗 连接 {}...", id);
            coordinator.pair(&id).await?;
            println!("✅ 已连接");
        }
        Commands::Unpair { id } => {
            println!("⏏️  断开 {}...", id);
            coordinator.unpair(&id).await?;
            println!("✅ 已断开");
        }
        Commands::Watch { all } => watch(coordinator, all).await?,
        // 在协调器启动之前处理
        Commands::Settings { .. } => {}
    }
    Ok(())
}

async fn watch(coordinator: &Arc<ScanCoordinator>, all: bool) -> Result<()> {
    let mut devices = coordinator.devices();
    let mut scanning = coordinator.scanning();
    let task = coordinator.spawn();
    println!("📡 周期扫描中，按 Ctrl-C 退出");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = scanning.changed() => {
                if changed.is_err() {
                    break;
                }
                if *scanning.borrow_and_update() {
                    println!("── 扫描开始 ──");
                }
            }
            changed = devices.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = devices.borrow_and_update().clone();
                print_devices(&snapshot, all);
            }
        }
    }

    coordinator.shutdown().await;
    task.await?;
    Ok(())
}

fn print_devices(devices: &[DeviceRecord], all: bool) {
    let listed: Vec<_> = devices.iter().filter(|d| all || d.is_listed()).collect();
    if listed.is_empty() {
        println!("   未发现设备");
        return;
    }
    for (i, dev) in listed.iter().enumerate() {
        let rssi = dev
            .rssi
            .map_or_else(|| "--".to_string(), |r| format!("{r} dBm"));
        println!(
            "   [{}] {} ({}) {} [{}]",
            i,
            dev.display_name(),
            dev.id,
            rssi,
            dev.status
        );
    }
}

fn settings_command(settings: &mut AppSettings, assignments: &[String]) -> Result<()> {
    if assignments.is_empty() {
        println!("# {}", AppSettings::config_path().display());
        println!("scan_window_secs = {}", settings.scan_window_secs);
        println!("rescan_interval_secs = {}", settings.rescan_interval_secs);
        println!("request_fine_location = {}", settings.request_fine_location);
        println!("data_dir = {}", settings.data_dir.display());
        println!("show_unnamed = {}", settings.show_unnamed);
        println!("verbose = {}", settings.verbose);
        return Ok(());
    }

    for assignment in assignments {
        let (key, value) = assignment
            .split_once('=')
            .with_context(|| format!("Expected key=value, got {assignment}"))?;
        apply_setting(settings, key.trim(), value.trim())?;
    }
    settings.save()?;
    println!("✅ 设置已保存到 {}", AppSettings::config_path().display());
    Ok(())
}

fn apply_setting(settings: &mut AppSettings, key: &str, value: &str) -> Result<()> {
    match key {
        "scan_window_secs" => settings.scan_window_secs = value.parse()?,
        "rescan_interval_secs" => settings.rescan_interval_secs = value.parse()?,
        "request_fine_location" => settings.request_fine_location = value.parse()?,
        "data_dir" => settings.data_dir = value.into(),
        "show_unnamed" => settings.show_unnamed = value.parse()?,
        "verbose" => settings.verbose = value.parse()?,
        other => anyhow::bail!("Unknown setting: {other}"),
    }
    Ok(())
}
