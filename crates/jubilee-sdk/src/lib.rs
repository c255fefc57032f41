//! # Jubilee Sonication Station SDK
//!
//! 统一入口：重导出各层 crate，并提供日志初始化。
//!
//! 分层（自下而上）：
//! - [`gcode`]：指令构造与应答解析
//! - [`duet`]：固件传输抽象（含确定性模拟器）
//! - [`driver`]：串行机器驱动、状态缓存、故障锁存
//! - [`station`]：换刀状态机、台面安全模型、协议执行器
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jubilee_sdk::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     jubilee_sdk::init_logging();
//!
//!     let machine = Arc::new(
//!         MachineBuilder::new()
//!             .transport(Box::new(SimDuet::new()))
//!             .connect()?,
//!     );
//!     let tools = Arc::new(ToolRegistry::load("tools.toml")?);
//!     let deck = Deck::load("config.json")?;
//!     let mut station = Station::new(machine, tools, deck, Box::new(SimSonicator::new()));
//!
//!     station.home_all()?;
//!     let protocol = Protocol::load("protocol.json")?;
//!     station.execute(&protocol)?;
//!     Ok(())
//! }
//! ```

pub use jubilee_duet as duet;
pub use jubilee_driver as driver;
pub use jubilee_gcode as gcode;
pub use jubilee_station as station;

/// 常用类型一站式导入
pub mod prelude {
    pub use crate::driver::{Machine, MachineBuilder, MachineSnapshot, Pose};
    pub use crate::duet::{Ack, Disposition, SimDuet, SimHandle, Transport, TransportError};
    pub use crate::gcode::{Axis, GcodeCommand};
    pub use crate::station::{
        AbortHandle, ChangeReport, ChangeState, Deck, DeckConfig, Labware, Operation, Protocol,
        PulseTrainSonicator, SimSonicator, SonicateWellSpec, SonicationSpec, Sonicator, Station,
        StationError, Step, Tool, ToolChanger, ToolRegistry,
    };
}

/// 初始化 tracing 日志（env-filter，缺省 `info`）
///
/// 同时桥接 `log` 门面的记录。重复调用安全（后续调用为空操作）。
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
