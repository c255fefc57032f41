//! 状态查询指令与应答解析
//!
//! M114 位置报告、M409 对象模型查询、M115 固件版本、T 刀具报告。
//! 应答文本格式以 RepRapFirmware 3 为准。

use crate::{GcodeCommand, GcodeError, Result};
use serde::Deserialize;

/// 查询当前位置（M114）
pub fn query_position() -> GcodeCommand {
    GcodeCommand::new("M114".to_string())
}

/// 查询各轴归位状态（M409）
pub fn query_homed() -> GcodeCommand {
    GcodeCommand::new("M409 K\"move.axes[].homed\"".to_string())
}

/// 查询固件版本（M115）
pub fn query_firmware() -> GcodeCommand {
    GcodeCommand::new("M115".to_string())
}

/// M409 应答的 JSON 外壳
#[derive(Debug, Deserialize)]
struct ObjectModelReply<T> {
    result: T,
}

/// 解析 M114 位置报告
///
/// 形如 `X:287.750 Y:289.750 Z:10.000 U:0.000 E:0.000 ...`，
/// 按 X, Y, Z, U 顺序取前四个轴。
pub fn parse_position_report(reply: &str) -> Result<[f64; 4]> {
    let mut values = [0.0f64; 4];
    let mut found = 0usize;
    for chunk in reply.split_whitespace() {
        let Some((letter, value)) = chunk.split_once(':') else {
            continue;
        };
        let slot = match letter {
            "X" => 0,
            "Y" => 1,
            "Z" => 2,
            "U" => 3,
            _ => continue,
        };
        // M114 里 X/Y 可能出现两次（第二次是电机坐标），只取第一次
        if found & (1 << slot) != 0 {
            continue;
        }
        let parsed: f64 = value.parse().map_err(|_| GcodeError::MalformedReply {
            expected: "axis:value pairs",
            reply: reply.to_string(),
        })?;
        values[slot] = parsed;
        found |= 1 << slot;
    }
    if found != 0b1111 {
        return Err(GcodeError::MalformedReply {
            expected: "X/Y/Z/U position fields",
            reply: reply.to_string(),
        });
    }
    Ok(values)
}

/// 解析 M409 归位状态应答
///
/// 应答是 JSON：`{"key":"move.axes[].homed","flags":"","result":[true,...]}`。
/// 只取前四个轴（X, Y, Z, U）。
pub fn parse_homed_reply(reply: &str) -> Result<[bool; 4]> {
    let parsed: ObjectModelReply<Vec<bool>> =
        serde_json::from_str(reply).map_err(|_| GcodeError::MalformedReply {
            expected: "M409 JSON with boolean result array",
            reply: reply.to_string(),
        })?;
    if parsed.result.len() < 4 {
        return Err(GcodeError::MissingField { field: "result[0..4]" });
    }
    let mut homed = [false; 4];
    homed.copy_from_slice(&parsed.result[..4]);
    Ok(homed)
}

/// 解析 M115 固件版本应答
///
/// 在 `FIRMWARE_VERSION:` 字段后取 semver 版本号。
pub fn parse_firmware_version(reply: &str) -> Result<semver::Version> {
    let tail = reply
        .split("FIRMWARE_VERSION:")
        .nth(1)
        .ok_or(GcodeError::MissingField { field: "FIRMWARE_VERSION" })?;
    let raw = tail
        .split_whitespace()
        .next()
        .ok_or(GcodeError::MissingField { field: "FIRMWARE_VERSION" })?;
    semver::Version::parse(raw.trim_end_matches(','))
        .map_err(|_| GcodeError::BadFirmwareVersion(raw.to_string()))
}

/// 解析 T 刀具报告
///
/// HTTP 接口返回的是文本而不是数字：
/// - `Tool 1 is selected.` -> `Some(1)`
/// - `No tool is selected.` -> `None`
/// - 裸数字 `-1` / `1` 也可能出现（其他接口）
pub fn parse_tool_reply(reply: &str) -> Result<Option<u8>> {
    let trimmed = reply.trim();
    if trimmed.starts_with("No tool") {
        return Ok(None);
    }
    if let Some(rest) = trimmed.strip_prefix("Tool") {
        let index = rest
            .split_whitespace()
            .next()
            .and_then(|w| w.parse::<u8>().ok())
            .ok_or_else(|| GcodeError::MalformedReply {
                expected: "`Tool <n> is selected.`",
                reply: reply.to_string(),
            })?;
        return Ok(Some(index));
    }
    match trimmed.parse::<i16>() {
        Ok(n) if n < 0 => Ok(None),
        Ok(n) if n <= u8::MAX as i16 => Ok(Some(n as u8)),
        _ => Err(GcodeError::MalformedReply {
            expected: "tool index or `No tool` text",
            reply: reply.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position_report() {
        let reply = "X:287.750 Y:289.750 Z:10.000 U:45.000 E:0.000 E0:0.0 \
                     Count 23020 23180 800 Machine X:287.750 Y:289.750";
        let pos = parse_position_report(reply).unwrap();
        assert_eq!(pos, [287.75, 289.75, 10.0, 45.0]);
    }

    #[test]
    fn test_parse_position_report_missing_axis() {
        let err = parse_position_report("X:1.0 Y:2.0 Z:3.0").unwrap_err();
        assert!(matches!(err, GcodeError::MalformedReply { .. }));
    }

    #[test]
    fn test_parse_homed_reply() {
        let reply = r#"{"key":"move.axes[].homed","flags":"","result":[true,true,false,true]}"#;
        assert_eq!(parse_homed_reply(reply).unwrap(), [true, true, false, true]);
    }

    #[test]
    fn test_parse_homed_reply_short_array() {
        let reply = r#"{"key":"move.axes[].homed","flags":"","result":[true,true]}"#;
        assert!(parse_homed_reply(reply).is_err());
    }

    #[test]
    fn test_parse_firmware_version() {
        let reply = "FIRMWARE_NAME: RepRapFirmware for Duet 3 MB6HC \
                     FIRMWARE_VERSION: 3.4.5 ELECTRONICS: Duet 3 MB6HC";
        assert_eq!(
            parse_firmware_version(reply).unwrap(),
            semver::Version::new(3, 4, 5)
        );
    }

    #[test]
    fn test_parse_tool_reply_variants() {
        assert_eq!(parse_tool_reply("Tool 1 is selected.").unwrap(), Some(1));
        assert_eq!(parse_tool_reply("No tool is selected.").unwrap(), None);
        assert_eq!(parse_tool_reply("-1").unwrap(), None);
        assert_eq!(parse_tool_reply("0").unwrap(), Some(0));
    }
}
