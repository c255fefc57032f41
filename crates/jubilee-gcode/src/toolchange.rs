//! 换刀相关指令构造
//!
//! 刀具选择/释放（T 指令）、锁轴电机电流（M906）、行程限制（M208）。
//!
//! 固件在 T 指令处应用/移除刀尖偏移，因此发送顺序由上层状态机控制：
//! 驶向停靠点的运动必须发生在 T-1 之前，位置恢复必须发生在 T<n> 之后。

use crate::{Axis, GcodeCommand, fmt_coord};

/// 选择指定刀具（T<n>）
///
/// 固件收到后即认为该刀具激活，并在后续运动上应用其偏移。
pub fn select_tool(index: u8) -> GcodeCommand {
    GcodeCommand::new(format!("T{index}"))
}

/// 释放当前刀具（T-1）
///
/// 固件收到后移除当前刀具偏移。
pub fn deselect_tool() -> GcodeCommand {
    GcodeCommand::new("T-1".to_string())
}

/// 查询当前刀具（T）
pub fn report_tool() -> GcodeCommand {
    GcodeCommand::new("T".to_string())
}

/// 设置某轴电机电流（M906，单位 mA）
///
/// 锁轴搜索期间用提升电流，锁定后回落到保持电流。
pub fn set_motor_current(axis: Axis, milliamps: u16) -> GcodeCommand {
    GcodeCommand::new(format!("M906 {}{milliamps}", axis.letter()))
}

/// 设置某轴软限位（M208，min:max）
///
/// 挂载较长刀具时动态收窄 Z 行程，防止刀尖触床。
pub fn set_axis_limit(axis: Axis, min: f64, max: f64) -> GcodeCommand {
    GcodeCommand::new(format!(
        "M208 {}{}:{}",
        axis.letter(),
        fmt_coord(min),
        fmt_coord(max)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_selection() {
        assert_eq!(select_tool(1).as_str(), "T1");
        assert_eq!(deselect_tool().as_str(), "T-1");
        assert_eq!(report_tool().as_str(), "T");
    }

    #[test]
    fn test_motor_current() {
        assert_eq!(set_motor_current(Axis::U, 650).as_str(), "M906 U650");
        assert_eq!(set_motor_current(Axis::U, 300).as_str(), "M906 U300");
    }

    #[test]
    fn test_axis_limit() {
        assert_eq!(set_axis_limit(Axis::Z, 0.0, 280.0).as_str(), "M208 Z0:280");
        assert_eq!(
            set_axis_limit(Axis::Z, 0.0, 242.5).as_str(),
            "M208 Z0:242.5"
        );
    }
}
