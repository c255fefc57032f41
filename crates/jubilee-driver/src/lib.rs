//! 驱动层模块
//!
//! 本模块提供 Jubilee 机器的设备驱动功能，包括：
//! - 严格串行的指令发送（请求，然后等确认，绝不并发）
//! - 位置与归位状态缓存（只从已确认的应答更新，ArcSwap 无锁读取）
//! - 独占 "machine busy" 锁（每个操作/换刀指令组持有）
//! - 确认超时升级为锁存故障（不自动重试）
//!
//! # 使用场景
//!
//! 适用于需要直接发送指令组的场景。大多数用户应该使用
//! `jubilee-station` 提供的更高级接口。

mod builder;
mod error;
mod machine;
mod pose;

pub use builder::MachineBuilder;
pub use error::DriverError;
pub use machine::{Machine, MachineSession, MachineSnapshot};
pub use pose::Pose;

/// 驱动层 Result 别名
pub type Result<T> = std::result::Result<T, DriverError>;
