//! G-code 指令构造与应答解析
//!
//! 本 crate 是整个 SDK 中唯一知道指令文本格式的地方，包括：
//! - 运动指令构造（G0/G28/G90/G91/G92/M400）
//! - 换刀与锁轴指令构造（T 选择、M906 电机电流、M208 行程限制）
//! - 应答解析（M114 位置报告、M409 对象模型查询、M115 固件版本）
//!
//! # 使用场景
//!
//! 指令在传输边界上始终是不透明字符串（[`GcodeCommand`]）。上层通过
//! 本 crate 的构造函数生成指令，通过解析函数读取固件的结构化应答，
//! 不在其他位置手写指令文本。

mod motion;
mod query;
mod toolchange;

pub use motion::*;
pub use query::*;
pub use toolchange::*;

use thiserror::Error;

/// 默认 XY 行进速度（mm/min）
pub const DEFAULT_TRAVEL_FEEDRATE: u32 = 13_000;

/// 受控下探（plunge）速度（mm/min）
pub const PLUNGE_FEEDRATE: u32 = 800;

/// 锁轴搜索旋转速度（mm/min，U 轴以角度计）
pub const LOCK_SEARCH_FEEDRATE: u32 = 500;

/// 指令层错误类型
#[derive(Error, Debug)]
pub enum GcodeError {
    /// 应答文本不符合预期格式
    #[error("Malformed reply (expected {expected}): {reply:?}")]
    MalformedReply { expected: &'static str, reply: String },

    /// 应答中缺少字段
    #[error("Missing field {field:?} in reply")]
    MissingField { field: &'static str },

    /// 固件版本字符串无法解析
    #[error("Unparseable firmware version: {0}")]
    BadFirmwareVersion(String),
}

/// 指令层 Result 别名
pub type Result<T> = std::result::Result<T, GcodeError>;

// ==================== 轴与指令基础类型 ====================

/// 机器轴
///
/// X/Y 为 CoreXY 平面轴，Z 为床轴，U 为换刀锁轴。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    /// 换刀锁旋转轴
    U,
}

impl Axis {
    /// 全部轴，按固件报告顺序（X, Y, Z, U）
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::U];

    /// 轴在固件对象模型中的下标
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::U => 3,
        }
    }

    /// 轴的指令字母
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::U => 'U',
        }
    }
}

/// 一条不透明的机器指令
///
/// 传输层只负责发送 `as_str()` 的内容并等待完成应答，不解释其语义。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GcodeCommand(String);

impl GcodeCommand {
    /// 从已构造好的指令文本创建
    pub(crate) fn new(text: String) -> Self {
        GcodeCommand(text)
    }

    /// 从原始文本创建指令（交互 shell 的透传入口）
    pub fn raw(text: impl Into<String>) -> Self {
        GcodeCommand(text.into())
    }

    /// 指令文本
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GcodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 格式化一个坐标值
///
/// 固件接受的数值格式：最多三位小数，去掉多余的尾零。
pub(crate) fn fmt_coord(v: f64) -> String {
    let s = format!("{v:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" { "0".to_string() } else { s.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_index_order() {
        for (i, axis) in Axis::ALL.iter().enumerate() {
            assert_eq!(axis.index(), i);
        }
    }

    #[test]
    fn test_fmt_coord() {
        assert_eq!(fmt_coord(287.75), "287.75");
        assert_eq!(fmt_coord(94.688), "94.688");
        assert_eq!(fmt_coord(150.0), "150");
        assert_eq!(fmt_coord(0.0), "0");
        assert_eq!(fmt_coord(-3.1), "-3.1");
    }

    #[test]
    fn test_raw_command_passthrough() {
        let cmd = GcodeCommand::raw("M999");
        assert_eq!(cmd.as_str(), "M999");
        assert_eq!(cmd.to_string(), "M999");
    }
}
