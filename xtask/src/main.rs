use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{Shell, cmd};

const BINARIES: [&str; 2] = ["bledeck", "bledeck-tui"];

#[derive(Parser)]
#[command(name = "xtask", about = "BleDeck 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建 CLI 和 TUI (release)
    Build,
    /// 运行 TUI (开发模式)
    Tui {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,
        /// 日志输出文件 (默认 /tmp/bledeck.log)
        #[arg(short = 'o', long)]
        log_file: Option<String>,
    },
    /// 周期扫描并在终端输出设备变化 (开发模式)
    Watch {
        #[arg(short, long, default_value = "debug")]
        log_level: String,
    },
    /// 设置 capabilities (免 sudo 扫描)
    SetupCaps,
    /// 运行测试
    Test,
    /// 运行测试并生成覆盖率报告
    Coverage,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir)
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        Err(_) => std::env::current_dir()?,
    };
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Tui {
            log_level,
            log_file,
        } => tui(&sh, &log_level, log_file)?,
        Commands::Watch { log_level } => watch(&sh, &log_level)?,
        Commands::SetupCaps => setup_caps(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn rust_log(level: &str) -> String {
    format!("{level},bledeck_core={level},bluer={level},btleplug=info")
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建所有组件...");
    cmd!(sh, "cargo build --release -p bledeck-cli -p bledeck-tui").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn tui(sh: &Shell, log_level: &str, log_file: Option<String>) -> Result<()> {
    let log_file = log_file.unwrap_or_else(|| "/tmp/bledeck.log".to_string());

    println!("🖥️  启动 TUI 调试模式...");
    println!("   日志级别: {}", log_level);
    println!("   日志文件: {}", log_file);
    println!();
    println!("💡 提示: 在另一个终端运行以下命令查看实时日志:");
    println!("   tail -f {}", log_file);
    println!();

    // 使用 shell 执行以支持重定向
    let command = format!(
        "RUST_LOG='{}' cargo run -p bledeck-tui 2>> '{}'",
        rust_log(log_level),
        log_file
    );

    cmd!(sh, "bash -c {command}").run()?;

    println!();
    println!("📁 日志已保存到: {}", log_file);
    Ok(())
}

fn watch(sh: &Shell, log_level: &str) -> Result<()> {
    println!("📡 启动周期扫描...");
    cmd!(sh, "cargo run -p bledeck-cli -- watch --all")
        .env("RUST_LOG", rust_log(log_level))
        .run()?;
    Ok(())
}

fn setup_caps(sh: &Shell) -> Result<()> {
    println!("🔐 设置 capabilities (免 sudo 蓝牙操作)...");

    build(sh)?;

    // CAP_NET_RAW: BLE 扫描
    // CAP_NET_ADMIN: 打开适配器电源
    for binary in BINARIES {
        cmd!(
            sh,
            "sudo setcap 'cap_net_admin,cap_net_raw+eip' target/release/{binary}"
        )
        .run()?;
    }

    println!("✅ Capabilities 设置完成");
    println!("   bledeck / bledeck-tui 现在可以免 sudo 运行");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    // 检查 cargo-tarpaulin 是否安装
    if cmd!(sh, "cargo tarpaulin --version").run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    println!("🔍 分析中...");
    cmd!(
        sh,
        "cargo tarpaulin --packages bledeck-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告已生成");
    println!("   HTML 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    cmd!(sh, "rm -rf target/coverage").run()?;
    println!("✅ 清理完成");
    Ok(())
}
