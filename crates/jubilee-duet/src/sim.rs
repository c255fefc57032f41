//! 确定性固件模拟器
//!
//! 在进程内模拟 Duet/RRF 固件的指令执行与应答，用于无硬件测试和
//! `--simulated` 运行模式。支持两类故障注入：
//! - 应答超时（按指令子串触发）
//! - 锁轴堵转角度（模拟换刀锁的力矩限位）
//!
//! 模拟器保证确定性：同样的指令序列总是产生同样的状态与应答。

use crate::{Ack, Disposition, Transport, TransportError};
use jubilee_gcode::GcodeCommand;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// 模拟器内部状态
#[derive(Debug)]
struct SimState {
    position: [f64; 4],
    homed: [bool; 4],
    absolute: bool,
    axis_limits: [(f64, f64); 4],
    motor_current_u: u16,
    selected_tool: Option<u8>,
    firmware_banner: String,
    /// U 轴堵转角度：锁搜索旋转到达此角度即停止（力矩限位触发）
    lock_stall_u: Option<f64>,
    /// 指令包含此子串时模拟"无应答"（触发一次后清除）
    timeout_on: Option<String>,
    /// 已发出的指令记录（按发送顺序）
    command_log: Vec<String>,
}

impl Default for SimState {
    fn default() -> Self {
        SimState {
            position: [0.0; 4],
            homed: [false; 4],
            absolute: true,
            axis_limits: [(0.0, 300.0), (0.0, 300.0), (0.0, 300.0), (0.0, 200.0)],
            motor_current_u: 900,
            selected_tool: None,
            firmware_banner: "FIRMWARE_NAME: RepRapFirmware for Duet 3 MB6HC \
                              FIRMWARE_VERSION: 3.4.5 ELECTRONICS: Duet 3 MB6HC"
                .to_string(),
            lock_stall_u: None,
            timeout_on: None,
            command_log: Vec::new(),
        }
    }
}

/// 进程内固件模拟器
pub struct SimDuet {
    state: Arc<Mutex<SimState>>,
}

/// 模拟器观察/注入句柄
///
/// 可在测试中克隆持有，在 `SimDuet` 被驱动层拿走后继续检查指令
/// 记录或注入故障。
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimDuet {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDuet {
    pub fn new() -> Self {
        SimDuet {
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// 获取观察/注入句柄
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }
}

impl SimHandle {
    /// 已发出的指令文本（按发送顺序）
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().command_log.clone()
    }

    /// 取走并清空指令记录
    pub fn take_commands(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().command_log)
    }

    /// 注入一次性的应答超时：下一条包含 `needle` 的指令将无应答
    pub fn timeout_on(&self, needle: impl Into<String>) {
        self.state.lock().timeout_on = Some(needle.into());
    }

    /// 设置锁轴堵转角度
    ///
    /// `Some(angle)`：U 轴正向旋转到 `angle` 即堵转（模拟锁已啮合）。
    /// `None`：旋转畅通无阻（模拟刀具未正确就位，搜索不到力矩限位）。
    pub fn set_lock_stall(&self, angle: Option<f64>) {
        self.state.lock().lock_stall_u = angle;
    }

    /// 当前选中的刀具
    pub fn selected_tool(&self) -> Option<u8> {
        self.state.lock().selected_tool
    }

    /// 当前位置
    pub fn position(&self) -> [f64; 4] {
        self.state.lock().position
    }

    /// 当前 U 轴电机电流（mA）
    pub fn motor_current_u(&self) -> u16 {
        self.state.lock().motor_current_u
    }

    /// 覆盖归位标志（构造测试前置状态用）
    pub fn set_homed(&self, homed: [bool; 4]) {
        self.state.lock().homed = homed;
    }

    /// 覆盖当前位置（构造测试前置状态用）
    pub fn set_position(&self, position: [f64; 4]) {
        self.state.lock().position = position;
    }
}

impl SimState {
    fn ack(&self, reply: Option<String>) -> Ack {
        Ack {
            disposition: Disposition::Accepted,
            message: None,
            reply,
            position: self.position,
            homed: self.homed,
        }
    }

    fn reject(&self, message: impl Into<String>) -> Ack {
        Ack {
            disposition: Disposition::Rejected,
            message: Some(message.into()),
            reply: None,
            position: self.position,
            homed: self.homed,
        }
    }

    fn axis_slot(letter: char) -> Option<usize> {
        match letter {
            'X' => Some(0),
            'Y' => Some(1),
            'Z' => Some(2),
            'U' => Some(3),
            _ => None,
        }
    }

    fn apply_move(&mut self, words: &[&str]) -> Ack {
        let mut targets: Vec<(usize, f64)> = Vec::new();
        for word in words {
            let mut chars = word.chars();
            let Some(letter) = chars.next() else { continue };
            if letter == 'F' {
                continue;
            }
            let Some(slot) = Self::axis_slot(letter) else {
                continue;
            };
            let Ok(value) = chars.as_str().parse::<f64>() else {
                return self.reject(format!("bad coordinate in {word:?}"));
            };
            targets.push((slot, value));
        }
        for (slot, _) in &targets {
            if !self.homed[*slot] {
                return self.reject("insufficient axes homed");
            }
        }
        for (slot, value) in targets {
            let current = self.position[slot];
            let mut target = if self.absolute { value } else { current + value };
            let (min, max) = self.axis_limits[slot];
            target = target.clamp(min, max);
            // 锁轴堵转：正向搜索旋转在堵转角处停下
            if slot == 3
                && target > current
                && let Some(stall) = self.lock_stall_u
            {
                target = target.min(stall.max(current));
            }
            self.position[slot] = target;
        }
        self.ack(None)
    }

    fn apply_home(&mut self, words: &[&str]) -> Ack {
        let axes: Vec<usize> = if words.is_empty() {
            vec![0, 1, 2, 3]
        } else {
            words
                .iter()
                .filter_map(|w| w.chars().next().and_then(Self::axis_slot))
                .collect()
        };
        for slot in axes {
            self.homed[slot] = true;
            self.position[slot] = 0.0;
        }
        self.ack(None)
    }

    fn position_report(&self) -> String {
        format!(
            "X:{:.3} Y:{:.3} Z:{:.3} U:{:.3} E:0.000 E0:0.000 \
             Count 0 0 0 Machine X:{:.3} Y:{:.3}",
            self.position[0],
            self.position[1],
            self.position[2],
            self.position[3],
            self.position[0],
            self.position[1],
        )
    }

    fn homed_report(&self) -> String {
        format!(
            r#"{{"key":"move.axes[].homed","flags":"","result":[{},{},{},{}]}}"#,
            self.homed[0], self.homed[1], self.homed[2], self.homed[3]
        )
    }

    fn tool_report(&self) -> String {
        match self.selected_tool {
            Some(index) => format!("Tool {index} is selected."),
            None => "No tool is selected.".to_string(),
        }
    }

    fn execute(&mut self, text: &str) -> Result<Ack, TransportError> {
        self.command_log.push(text.to_string());

        let timeout_hit = self
            .timeout_on
            .as_deref()
            .is_some_and(|needle| text.contains(needle));
        if timeout_hit {
            self.timeout_on = None;
            return Err(TransportError::Timeout { timeout_ms: 5_000 });
        }

        let mut words = text.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(self.ack(None));
        };
        let rest: Vec<&str> = words.collect();

        let ack = match head {
            "G0" | "G1" => self.apply_move(&rest),
            "G28" => self.apply_home(&rest),
            "G90" => {
                self.absolute = true;
                self.ack(None)
            }
            "G91" => {
                self.absolute = false;
                self.ack(None)
            }
            "G92" => {
                for word in &rest {
                    let mut chars = word.chars();
                    if let Some(slot) = chars.next().and_then(Self::axis_slot)
                        && let Ok(value) = chars.as_str().parse::<f64>()
                    {
                        self.position[slot] = value;
                    }
                }
                self.ack(None)
            }
            "M400" => self.ack(None),
            "M114" => {
                let report = self.position_report();
                self.ack(Some(report))
            }
            "M409" => {
                let report = self.homed_report();
                self.ack(Some(report))
            }
            "M115" => {
                let banner = self.firmware_banner.clone();
                self.ack(Some(banner))
            }
            "M906" => {
                for word in &rest {
                    if let Some(value) = word.strip_prefix('U')
                        && let Ok(ma) = value.parse::<u16>()
                    {
                        self.motor_current_u = ma;
                    }
                }
                self.ack(None)
            }
            "M208" => {
                for word in &rest {
                    let mut chars = word.chars();
                    if let Some(slot) = chars.next().and_then(Self::axis_slot)
                        && let Some((min, max)) = chars.as_str().split_once(':')
                        && let (Ok(min), Ok(max)) = (min.parse::<f64>(), max.parse::<f64>())
                    {
                        self.axis_limits[slot] = (min, max);
                    }
                }
                self.ack(None)
            }
            "M999" => {
                self.homed = [false; 4];
                self.selected_tool = None;
                self.ack(None)
            }
            "T" => {
                let report = self.tool_report();
                self.ack(Some(report))
            }
            _ if head.starts_with('T') => {
                match head[1..].parse::<i16>() {
                    Ok(n) if n < 0 => self.selected_tool = None,
                    Ok(n) => self.selected_tool = Some(n as u8),
                    Err(_) => return Ok(self.reject(format!("bad tool index {head:?}"))),
                }
                self.ack(None)
            }
            _ => self.reject(format!("unknown command {head:?}")),
        };
        Ok(ack)
    }
}

impl Transport for SimDuet {
    fn exchange(&mut self, command: &GcodeCommand) -> Result<Ack, TransportError> {
        trace!(command = command.as_str(), "sim exchange");
        self.state.lock().execute(command.as_str())
    }
}
