//! 驱动层错误类型定义

use jubilee_duet::TransportError;
use jubilee_gcode::{Axis, GcodeError};
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输错误（超时除外，超时单独处理为锁存故障）
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 指令/应答格式错误
    #[error("Gcode error: {0}")]
    Gcode(#[from] GcodeError),

    /// 确认超时
    ///
    /// 机器进入锁存故障。未确认的运动指令不允许重发。
    #[error("Acknowledgment timeout after {timeout_ms} ms (fault latched)")]
    AckTimeout { timeout_ms: u64 },

    /// 机器处于锁存故障状态，需要操作员复位
    #[error("Machine faulted: {0}")]
    Faulted(String),

    /// 固件拒绝执行指令
    #[error("Command rejected by firmware: {command} ({reason})")]
    Rejected { command: String, reason: String },

    /// 固件报告执行错误
    #[error("Firmware error on {command}: {reason}")]
    FirmwareError { command: String, reason: String },

    /// 运动前置条件：所需轴未归位
    #[error("Axis {axis:?} is not homed")]
    NotHomed { axis: Axis },

    /// 固件版本过旧
    #[error("Firmware version {found} does not satisfy requirement {required}")]
    FirmwareTooOld { found: String, required: String },
}
