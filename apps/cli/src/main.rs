//! # Jubilee CLI
//!
//! 超声工作站命令行工具，双模式：
//!
//! ## One-shot 模式（脚本/无人值守）
//!
//! ```bash
//! jubilee-cli --simulated home
//! jubilee-cli --simulated run protocol.json
//! ```
//!
//! ## REPL 模式（调试/台面示教）
//!
//! ```bash
//! $ jubilee-cli --simulated shell
//! jubilee> home
//! jubilee> tool 1
//! jubilee> sonicate 5 A1 10.0 3.0
//! jubilee> park
//! jubilee> exit
//! ```
//!
//! 所有运动都经由工作站层的换刀状态机与台面安全模型，shell 不存在
//! 绕过安全校验的路径。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod repl;

/// Jubilee 超声工作站命令行工具
#[derive(Parser, Debug)]
#[command(name = "jubilee-cli")]
#[command(about = "Command-line interface for the Jubilee sonication station", long_about = None)]
#[command(version)]
struct Cli {
    /// 刀具配置表（TOML）
    #[arg(long, default_value = "tools.toml")]
    tools: PathBuf,

    /// 台面配置文件（JSON）
    #[arg(long, default_value = "config.json")]
    deck: PathBuf,

    /// 使用内置固件模拟器（无硬件）
    #[arg(long)]
    simulated: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 归位全部轴（已挂载的刀具先停靠），然后回抽到空闲高度
    Home,
    /// 绝对坐标安全移动（横移前回抽到 safe_z）
    Move {
        #[arg(long)]
        x: Option<f64>,
        #[arg(long)]
        y: Option<f64>,
        #[arg(long)]
        z: Option<f64>,
    },
    /// 换到指定刀具
    Tool { index: u8 },
    /// 停靠当前刀具
    Park,
    /// 单个孔位超声
    Sonicate {
        /// 台面槽位
        slot: u8,
        /// 孔位（如 A1、H12）
        well: String,
        /// 下探深度（mm，自板顶量起）
        depth: f64,
        /// 驻留时间（秒）
        seconds: f64,
        /// 功率（0.4 到 1.0，缺省 0.4）
        #[arg(long)]
        power: Option<f64>,
        /// 驻留后执行清洗子例程
        #[arg(long)]
        autoclean: bool,
    },
    /// 执行协议文件（JSON，整体加载后按序执行）
    Run { protocol: PathBuf },
    /// 立即执行清洗子例程
    Clean,
    /// 显示台面配置与 safe_z
    Deck,
    /// 保存台面配置
    SaveDeck {
        /// 目标路径（缺省写回加载路径）
        path: Option<PathBuf>,
    },
    /// 显示机器状态
    Status,
    /// 操作员故障复位（复位后需要重新归位）
    Reset,
    /// 交互 shell
    Shell,
}

fn main() -> Result<()> {
    jubilee_sdk::init_logging();
    let cli = Cli::parse();

    let mut station = commands::build_station(&cli.tools, &cli.deck, cli.simulated)?;

    // CTRL-C 只请求中止，在下一个安全检查点生效
    let abort = station.abort_handle();
    let _ = ctrlc::set_handler(move || abort.request());

    match cli.command {
        Command::Home => commands::home(&mut station),
        Command::Move { x, y, z } => commands::move_to(&mut station, x, y, z),
        Command::Tool { index } => commands::change_tool(&mut station, Some(index)),
        Command::Park => commands::change_tool(&mut station, None),
        Command::Sonicate {
            slot,
            well,
            depth,
            seconds,
            power,
            autoclean,
        } => commands::sonicate(&mut station, slot, &well, depth, seconds, power, autoclean),
        Command::Run { protocol } => commands::run_protocol(&mut station, &protocol),
        Command::Clean => commands::clean(&mut station),
        Command::Deck => commands::show_deck(&station),
        Command::SaveDeck { path } => {
            commands::save_deck(&station, path.as_deref().unwrap_or(&cli.deck))
        }
        Command::Status => commands::show_status(&station),
        Command::Reset => commands::reset(&mut station),
        Command::Shell => repl::run(&mut station, &cli.deck),
    }
}
