//! 工作站核心模块
//!
//! 本模块提供声明式协议在多刀具运动平台上的安全执行，包括：
//! - 刀具偏移坐标系管理（偏移的应用/移除顺序约束）
//! - 换刀状态机（显式过渡表、原子指令组、故障锁存）
//! - 台面与安全模型（safe_z 包络、受控下探边界、孔位解析）
//! - 协议执行器（逐操作确认执行、autoclean 子例程、操作员中止）
//!
//! # 使用场景
//!
//! 这是大多数用户应该使用的模块。交互 shell 与协议文件执行都经由
//! [`Station`]，绝不绕过状态机和安全模型直接发指令。

pub mod abort;
pub mod deck;
mod error;
pub mod executor;
pub mod protocol;
pub mod sonicator;
pub mod tool;
pub mod toolchange;
pub mod types;

pub use abort::AbortHandle;
pub use deck::{Deck, DeckConfig, Labware};
pub use error::StationError;
pub use executor::Station;
pub use protocol::{Operation, Protocol, SonicateWellSpec, Step};
pub use sonicator::{PulseTrainSonicator, SimSonicator, SonicationSpec, Sonicator};
pub use tool::{LockParams, ParkPoints, Tool, ToolRegistry};
pub use toolchange::{ChangeReport, ChangeState, ToolChanger};
pub use types::{Point2, Vec3};

/// 工作站层 Result 别名
pub type Result<T> = std::result::Result<T, StationError>;
