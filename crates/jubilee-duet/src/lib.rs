//! # Duet 传输抽象层
//!
//! 固件请求/应答通道的统一抽象：发送一条不透明指令，阻塞等待结构化
//! 确认（接受/拒绝/错误、运动后位置、归位标志）。
//!
//! 物理机器没有并发指令的概念，所以接口是严格的"请求然后等应答"。
//! 上层（驱动层）保证同一时刻只有一条指令在途。
//!
//! 内置 [`sim::SimDuet`] 确定性固件模拟器，供测试与 `--simulated`
//! 模式使用，无需真实硬件。

use jubilee_gcode::GcodeCommand;
use thiserror::Error;

pub mod sim;

pub use sim::{SimDuet, SimHandle};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// 应答超时
    ///
    /// 上层必须将其升级为故障锁存，绝不能自动重发：未确认的运动
    /// 指令重发可能导致物理上的二次运动。
    #[error("Acknowledgment timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    /// 固件尚未就绪（连接阶段）
    #[error("Firmware not ready: {0}")]
    NotReady(String),
}

/// 指令处置结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 固件接受并执行完毕
    Accepted,
    /// 固件拒绝执行（如轴未归位）
    Rejected,
    /// 固件报告执行错误
    Error,
}

/// 结构化指令确认
///
/// 每条确认都带有执行后的机器位置与归位标志；位置缓存只允许从
/// 这里更新，绝不允许推测。
#[derive(Debug, Clone)]
pub struct Ack {
    pub disposition: Disposition,
    /// 拒绝/错误原因
    pub message: Option<String>,
    /// 查询类指令的文本应答（M114/M409/M115/T）
    pub reply: Option<String>,
    /// 执行后的位置（X, Y, Z, U）
    pub position: [f64; 4],
    /// 各轴归位标志（X, Y, Z, U）
    pub homed: [bool; 4],
}

impl Ack {
    /// 是否被固件接受
    pub fn is_accepted(&self) -> bool {
        self.disposition == Disposition::Accepted
    }
}

/// 固件传输通道
///
/// 实现者负责把指令文本送达固件并取回确认。接口是阻塞的：
/// `exchange` 返回时该指令已经执行完成（或失败/超时）。
pub trait Transport: Send {
    /// 发送一条指令并等待确认
    fn exchange(&mut self, command: &GcodeCommand) -> Result<Ack, TransportError>;

    /// 阻塞直到运动队列清空（M400 语义）
    ///
    /// 每个指令组结束后调用一次，作为组的终止确认。
    fn wait_until_idle(&mut self) -> Result<Ack, TransportError> {
        self.exchange(&jubilee_gcode::finish_moves())
    }

    /// 读取当前位置与归位标志，不产生运动
    fn status(&mut self) -> Result<Ack, TransportError> {
        self.exchange(&jubilee_gcode::query_position())
    }
}
