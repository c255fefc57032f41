//! 运动指令构造
//!
//! 归位、直线运动、绝对/相对模式切换、运动完成同步。

use crate::{Axis, GcodeCommand, fmt_coord};

/// 归位全部轴（G28）
pub fn home_all() -> GcodeCommand {
    GcodeCommand::new("G28".to_string())
}

/// 归位单个轴（G28 <axis>）
///
/// 注意：调用方负责归位顺序。Y 必须先于 X 归位，避免撞上刀架。
pub fn home_axis(axis: Axis) -> GcodeCommand {
    GcodeCommand::new(format!("G28 {}", axis.letter()))
}

/// 切换到绝对坐标模式（G90）
pub fn set_absolute_mode() -> GcodeCommand {
    GcodeCommand::new("G90".to_string())
}

/// 切换到相对坐标模式（G91）
pub fn set_relative_mode() -> GcodeCommand {
    GcodeCommand::new("G91".to_string())
}

/// 等待所有运动完成（M400）
///
/// 每个指令组结束后发送，作为阻塞的 "wait until idle" 同步点。
pub fn finish_moves() -> GcodeCommand {
    GcodeCommand::new("M400".to_string())
}

/// 将某轴的当前位置标定为给定值（G92）
pub fn set_axis_position(axis: Axis, value: f64) -> GcodeCommand {
    GcodeCommand::new(format!("G92 {}{}", axis.letter(), fmt_coord(value)))
}

/// 构造一条直线运动指令（G0）
///
/// 只包含给定的轴；`feedrate` 单位 mm/min。
/// 绝对/相对语义由当前模式（G90/G91）决定，由驱动层跟踪。
pub fn linear_move(targets: &[(Axis, f64)], feedrate: u32) -> GcodeCommand {
    let mut text = String::from("G0");
    for (axis, value) in targets {
        text.push(' ');
        text.push(axis.letter());
        text.push_str(&fmt_coord(*value));
    }
    text.push_str(&format!(" F{feedrate}"));
    GcodeCommand::new(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_TRAVEL_FEEDRATE;

    #[test]
    fn test_home_commands() {
        assert_eq!(home_all().as_str(), "G28");
        assert_eq!(home_axis(Axis::Y).as_str(), "G28 Y");
        assert_eq!(home_axis(Axis::U).as_str(), "G28 U");
    }

    #[test]
    fn test_mode_commands() {
        assert_eq!(set_absolute_mode().as_str(), "G90");
        assert_eq!(set_relative_mode().as_str(), "G91");
        assert_eq!(finish_moves().as_str(), "M400");
    }

    #[test]
    fn test_linear_move_xy() {
        let cmd = linear_move(
            &[(Axis::X, 148.25), (Axis::Y, 289.5)],
            DEFAULT_TRAVEL_FEEDRATE,
        );
        assert_eq!(cmd.as_str(), "G0 X148.25 Y289.5 F13000");
    }

    #[test]
    fn test_linear_move_z_only() {
        let cmd = linear_move(&[(Axis::Z, 65.0)], 800);
        assert_eq!(cmd.as_str(), "G0 Z65 F800");
    }

    #[test]
    fn test_set_axis_position() {
        assert_eq!(set_axis_position(Axis::U, 0.0).as_str(), "G92 U0");
    }
}
