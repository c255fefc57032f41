//! Machine API 模块
//!
//! 提供对外的 [`Machine`] 结构体，封装传输通道、状态缓存与故障锁存。

use crate::error::DriverError;
use crate::pose::Pose;
use crate::Result;
use arc_swap::ArcSwap;
use jubilee_duet::{Ack, Disposition, Transport, TransportError};
use jubilee_gcode::{self as gcode, Axis, GcodeCommand};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

/// 机器状态快照
///
/// 监控方通过 [`Machine::snapshot`] 无锁读取；只从已确认的应答更新。
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineSnapshot {
    pub pose: Pose,
    /// 各轴归位标志（X, Y, Z, U）
    pub homed: [bool; 4],
}

impl MachineSnapshot {
    /// 全部所需轴是否已归位
    pub fn all_homed(&self) -> bool {
        self.homed.iter().all(|&h| h)
    }
}

/// 串行 IO 通道（独占锁内持有）
struct MachineIo {
    transport: Box<dyn Transport>,
    /// 当前绝对/相对模式；`None` 表示未知，必须强制设置
    absolute: Option<bool>,
}

/// Jubilee 机器驱动（对外 API）
///
/// 所有指令都经由 [`MachineSession`] 串行发出。会话持有独占的
/// "machine busy" 锁，保证一个操作或换刀指令组执行期间没有别的
/// 指令插入。
pub struct Machine {
    io: Mutex<MachineIo>,
    snapshot: ArcSwap<MachineSnapshot>,
    faulted: AtomicBool,
    fault_reason: Mutex<Option<String>>,
    firmware: semver::Version,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("snapshot", &self.snapshot)
            .field("faulted", &self.faulted)
            .field("fault_reason", &self.fault_reason)
            .field("firmware", &self.firmware)
            .finish_non_exhaustive()
    }
}

impl Machine {
    pub(crate) fn new(transport: Box<dyn Transport>, firmware: semver::Version) -> Self {
        Machine {
            io: Mutex::new(MachineIo {
                transport,
                absolute: None,
            }),
            snapshot: ArcSwap::from_pointee(MachineSnapshot::default()),
            faulted: AtomicBool::new(false),
            fault_reason: Mutex::new(None),
            firmware,
        }
    }

    /// 连接时报告的固件版本
    pub fn firmware_version(&self) -> &semver::Version {
        &self.firmware
    }

    /// 无锁读取当前状态快照
    pub fn snapshot(&self) -> Arc<MachineSnapshot> {
        self.snapshot.load_full()
    }

    /// 是否处于锁存故障状态
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// 故障原因（未故障时为 `None`）
    pub fn fault_reason(&self) -> Option<String> {
        self.fault_reason.lock().clone()
    }

    /// 获取独占会话
    ///
    /// 故障锁存期间拒绝开启会话；并发调用方在此阻塞，直到持锁的
    /// 操作/换刀指令组结束。
    pub fn session(&self) -> Result<MachineSession<'_>> {
        if self.is_faulted() {
            return Err(self.fault_error());
        }
        Ok(MachineSession {
            io: self.io.lock(),
            machine: self,
        })
    }

    /// 操作员复位：软件复位固件并清除故障锁存
    ///
    /// 复位后所有归位标志清空，必须重新归位并重新确认刀具挂载状态
    /// 才能继续执行。
    pub fn operator_reset(&self) -> Result<Arc<MachineSnapshot>> {
        let mut io = self.io.lock();
        info!("operator reset: issuing firmware reset");
        let ack = io.transport.exchange(&GcodeCommand::raw("M999"))?;
        self.store_ack(&ack);
        self.faulted.store(false, Ordering::Release);
        *self.fault_reason.lock() = None;
        io.absolute = None;
        drop(io);
        let mut session = self.session()?;
        session.refresh_status()
    }

    fn fault_error(&self) -> DriverError {
        DriverError::Faulted(
            self.fault_reason
                .lock()
                .clone()
                .unwrap_or_else(|| "unknown fault".to_string()),
        )
    }

    fn latch_fault(&self, reason: String) {
        error!(reason = reason.as_str(), "latching machine fault");
        *self.fault_reason.lock() = Some(reason);
        self.faulted.store(true, Ordering::Release);
    }

    fn store_ack(&self, ack: &Ack) {
        self.snapshot.store(Arc::new(MachineSnapshot {
            pose: ack.position.into(),
            homed: ack.homed,
        }));
    }
}

/// 独占机器会话
///
/// 生命周期即 "machine busy" 锁的持有期。一个协议操作或一个换刀
/// 过渡指令组对应一次会话（或一次会话内的一个指令组）。
pub struct MachineSession<'a> {
    io: MutexGuard<'a, MachineIo>,
    machine: &'a Machine,
}

impl std::fmt::Debug for MachineSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineSession")
            .field("machine", &self.machine)
            .finish_non_exhaustive()
    }
}

impl MachineSession<'_> {
    /// 发出一条指令并等待确认
    ///
    /// 确认超时将锁存故障并返回 [`DriverError::AckTimeout`]；
    /// 固件拒绝/报错原样上抛，位置缓存仍按应答更新。
    pub fn issue(&mut self, command: &GcodeCommand) -> Result<Ack> {
        if self.machine.is_faulted() {
            return Err(self.machine.fault_error());
        }
        debug!(command = command.as_str(), "issue");
        match self.io.transport.exchange(command) {
            Ok(ack) => {
                self.machine.store_ack(&ack);
                match ack.disposition {
                    Disposition::Accepted => Ok(ack),
                    Disposition::Rejected => Err(DriverError::Rejected {
                        command: command.as_str().to_string(),
                        reason: ack.message.clone().unwrap_or_default(),
                    }),
                    Disposition::Error => Err(DriverError::FirmwareError {
                        command: command.as_str().to_string(),
                        reason: ack.message.clone().unwrap_or_default(),
                    }),
                }
            }
            Err(TransportError::Timeout { timeout_ms }) => {
                self.machine
                    .latch_fault(format!("acknowledgment timeout on {command}"));
                Err(DriverError::AckTimeout { timeout_ms })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 发出一个原子指令组并在末尾同步
    ///
    /// 组内任一指令失败立即中止；成功时以 M400 等待运动队列清空，
    /// 返回终止确认。
    pub fn issue_group(&mut self, group: &[GcodeCommand]) -> Result<Ack> {
        for command in group {
            self.issue(command)?;
        }
        self.wait_until_idle()
    }

    /// 阻塞直到运动队列清空
    pub fn wait_until_idle(&mut self) -> Result<Ack> {
        self.issue(&gcode::finish_moves())
    }

    /// 从固件刷新位置与归位标志
    pub fn refresh_status(&mut self) -> Result<Arc<MachineSnapshot>> {
        let pos_ack = self.issue(&gcode::query_position())?;
        let reply = pos_ack.reply.as_deref().unwrap_or_default();
        let position = gcode::parse_position_report(reply)?;

        let homed_ack = self.issue(&gcode::query_homed())?;
        let reply = homed_ack.reply.as_deref().unwrap_or_default();
        let homed = gcode::parse_homed_reply(reply)?;

        let snapshot = Arc::new(MachineSnapshot {
            pose: position.into(),
            homed,
        });
        self.machine.snapshot.store(snapshot.clone());
        Ok(snapshot)
    }

    /// 查询固件当前激活的刀具
    pub fn query_active_tool(&mut self) -> Result<Option<u8>> {
        let ack = self.issue(&gcode::report_tool())?;
        let reply = ack.reply.as_deref().unwrap_or_default();
        Ok(gcode::parse_tool_reply(reply)?)
    }

    /// 当前状态快照（已缓存，不触发查询）
    pub fn snapshot(&self) -> Arc<MachineSnapshot> {
        self.machine.snapshot()
    }

    /// 运动前置检查：给定轴必须已归位
    pub fn ensure_homed(&self, axes: &[Axis]) -> Result<()> {
        let snapshot = self.machine.snapshot();
        for &axis in axes {
            if !snapshot.homed[axis.index()] {
                return Err(DriverError::NotHomed { axis });
            }
        }
        Ok(())
    }

    // ==================== 坐标模式 ====================

    /// 切换到绝对坐标模式（只在状态变化或 `force` 时发指令）
    pub fn set_absolute(&mut self, force: bool) -> Result<()> {
        if self.io.absolute == Some(true) && !force {
            return Ok(());
        }
        self.issue(&gcode::set_absolute_mode())?;
        self.io.absolute = Some(true);
        Ok(())
    }

    /// 切换到相对坐标模式（只在状态变化或 `force` 时发指令）
    pub fn set_relative(&mut self, force: bool) -> Result<()> {
        if self.io.absolute == Some(false) && !force {
            return Ok(());
        }
        self.issue(&gcode::set_relative_mode())?;
        self.io.absolute = Some(false);
        Ok(())
    }

    // ==================== 运动 ====================

    /// 绝对坐标直线运动（只移动给定的轴）
    pub fn move_xyz_absolute(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        wait: bool,
    ) -> Result<()> {
        self.set_absolute(false)?;
        self.move_xyz(x, y, z, wait)
    }

    /// 相对坐标直线运动（只移动给定的轴）
    pub fn move_xyz_relative(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        wait: bool,
    ) -> Result<()> {
        self.set_relative(false)?;
        self.move_xyz(x, y, z, wait)
    }

    fn move_xyz(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        wait: bool,
    ) -> Result<()> {
        let mut targets: Vec<(Axis, f64)> = Vec::new();
        if let Some(x) = x {
            targets.push((Axis::X, x));
        }
        if let Some(y) = y {
            targets.push((Axis::Y, y));
        }
        if let Some(z) = z {
            targets.push((Axis::Z, z));
        }
        if targets.is_empty() {
            if wait {
                self.wait_until_idle()?;
            }
            return Ok(());
        }
        let axes: Vec<Axis> = targets.iter().map(|(a, _)| *a).collect();
        self.ensure_homed(&axes)?;
        self.issue(&gcode::linear_move(&targets, gcode::DEFAULT_TRAVEL_FEEDRATE))?;
        if wait {
            self.wait_until_idle()?;
        }
        Ok(())
    }

    /// 以受控速度绝对移动单轴（下探/锁轴搜索用）
    pub fn move_axis_absolute(&mut self, axis: Axis, target: f64, feedrate: u32) -> Result<Ack> {
        self.ensure_homed(&[axis])?;
        self.set_absolute(false)?;
        self.issue(&gcode::linear_move(&[(axis, target)], feedrate))?;
        self.wait_until_idle()
    }

    // ==================== 归位 ====================

    /// 归位全部轴（G28），随后强制绝对模式并刷新状态
    pub fn home_all(&mut self) -> Result<Arc<MachineSnapshot>> {
        self.issue(&gcode::home_all())?;
        self.wait_until_idle()?;
        self.set_absolute(true)?;
        self.refresh_status()
    }

    /// 归位 X/Y/U 轴
    ///
    /// Y 先于 X 归位，避免撞上刀架。
    pub fn home_xyu(&mut self) -> Result<Arc<MachineSnapshot>> {
        for axis in [Axis::Y, Axis::X, Axis::U] {
            self.issue(&gcode::home_axis(axis))?;
        }
        self.wait_until_idle()?;
        self.set_absolute(true)?;
        self.refresh_status()
    }

    /// 归位 Z 轴（调用方负责确认床面无障碍）
    pub fn home_z(&mut self) -> Result<Arc<MachineSnapshot>> {
        self.issue(&gcode::home_axis(Axis::Z))?;
        self.wait_until_idle()?;
        self.set_absolute(true)?;
        self.refresh_status()
    }
}
