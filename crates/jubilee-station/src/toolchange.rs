//! 换刀状态机
//!
//! 同一时刻至多一次换刀在途。状态序列固定：
//! `Idle → Freeing → UnlockedAtPark → TravelingBare → Picking → Locked
//! → Restoring → Idle`，终态 `Faulted`。
//!
//! 每次过渡对应一个原子指令组，组内全部指令被固件确认后才推进；
//! 过渡中途确认失败（含超时）即锁存 `Faulted`，后续协议执行被拒绝，
//! 直到操作员重新归位并重新确认刀具挂载状态。失败的锁啮合之后
//! 盲目重试可能再次顶上机械干涉，所以没有任何自动重试。
//!
//! 顺序不变量：
//! - `Freeing` 期间先抬 Z 再横移（越过床上障碍物）
//! - 驶向停靠点的运动发生在 T-1 之前（偏移仍由固件按旧刀应用）
//! - `Restoring` 期间先恢复 Z 再恢复 XY，且发生在 T<n> 之后
//!   （避免拖着新偏移的刀尖横穿未确认的 XY 空间）

use crate::abort::AbortHandle;
use crate::error::StationError;
use crate::tool::{MountState, Tool, ToolRegistry};
use crate::Result;
use jubilee_driver::{MachineSession, Pose};
use jubilee_gcode::{self as gcode, Axis, GcodeCommand, LOCK_SEARCH_FEEDRATE};
use std::sync::Arc;
use tracing::{debug, info};

/// 锁堵转判定容差（度）
///
/// 搜索旋转停在上界减容差之内，视为到达上界而未检出力矩限位。
const LOCK_STALL_TOLERANCE_DEG: f64 = 1.0;

/// 换刀状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Idle,
    /// 旧刀驶向停靠点并释放机械锁
    Freeing,
    UnlockedAtPark,
    /// 裸托架移动，参考位置已捕获
    TravelingBare,
    /// 驶向新刀停靠点并啮合锁
    Picking,
    Locked,
    /// 经新偏移坐标系恢复换刀前位置
    Restoring,
    /// 终态：需要操作员复位
    Faulted,
}

impl ChangeState {
    /// 显式过渡表
    ///
    /// 顺序不变量独立于传输层可检验。`Faulted` 无出边。
    pub fn next(self) -> Option<ChangeState> {
        match self {
            ChangeState::Idle => Some(ChangeState::Freeing),
            ChangeState::Freeing => Some(ChangeState::UnlockedAtPark),
            ChangeState::UnlockedAtPark => Some(ChangeState::TravelingBare),
            ChangeState::TravelingBare => Some(ChangeState::Picking),
            ChangeState::Picking => Some(ChangeState::Locked),
            ChangeState::Locked => Some(ChangeState::Restoring),
            ChangeState::Restoring => Some(ChangeState::Idle),
            ChangeState::Faulted => None,
        }
    }

    /// 一次完整换刀访问的状态序列
    pub const FULL_SEQUENCE: [ChangeState; 8] = [
        ChangeState::Idle,
        ChangeState::Freeing,
        ChangeState::UnlockedAtPark,
        ChangeState::TravelingBare,
        ChangeState::Picking,
        ChangeState::Locked,
        ChangeState::Restoring,
        ChangeState::Idle,
    ];
}

/// 一次换刀的执行报告
#[derive(Debug, Clone)]
pub struct ChangeReport {
    /// 实际访问的状态序列（含起止 Idle）
    pub visited: Vec<ChangeState>,
    pub from: Option<u8>,
    pub to: Option<u8>,
    /// 同刀换同刀：状态序列完整但不发任何指令
    pub noop: bool,
}

/// 换刀状态机
pub struct ToolChanger {
    registry: Arc<ToolRegistry>,
    state: ChangeState,
    mounted: Option<u8>,
}

impl ToolChanger {
    /// 以裸托架（无刀具挂载）初始化
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        ToolChanger {
            registry,
            state: ChangeState::Idle,
            mounted: None,
        }
    }

    /// 当前状态
    pub fn state(&self) -> ChangeState {
        self.state
    }

    /// 当前挂载的刀具
    pub fn mounted_tool(&self) -> Option<u8> {
        self.mounted
    }

    /// 某把刀具的挂载状态
    pub fn mount_state(&self, index: u8) -> MountState {
        if self.mounted == Some(index) {
            MountState::Mounted
        } else {
            MountState::Parked
        }
    }

    /// 操作员复位：经机器复位与重新归位后，以人工确认的挂载状态
    /// 回到 `Idle`
    pub fn reset(&mut self, verified_mount: Option<u8>) {
        info!(?verified_mount, "tool changer reset by operator");
        self.state = ChangeState::Idle;
        self.mounted = verified_mount;
    }

    /// 执行一次换刀（`target = None` 表示仅停靠，裸托架收尾）
    ///
    /// 调用方持有机器会话（busy 锁）贯穿整个换刀。中止请求只在
    /// 开始前的检查点生效；一旦开始，推迟到完成。
    pub fn change_to(
        &mut self,
        session: &mut MachineSession<'_>,
        target: Option<u8>,
        travel_z: f64,
        abort: &AbortHandle,
    ) -> Result<ChangeReport> {
        if self.state != ChangeState::Idle {
            return Err(StationError::InvalidState { state: self.state });
        }
        abort.checkpoint("tool-change start")?;

        // 运动开始前解析全部静态数据：缺失注册在这里失败，
        // 绝不默认为零偏移
        let old_tool = self.mounted.map(|i| self.registry.get(i).cloned()).transpose()?;
        let new_tool = target.map(|i| self.registry.get(i).cloned()).transpose()?;

        let mut report = ChangeReport {
            visited: vec![ChangeState::Idle],
            from: self.mounted,
            to: target,
            noop: target == self.mounted,
        };

        if report.noop {
            // 同刀换同刀：不发指令，状态序列完整走一遍
            for state in &ChangeState::FULL_SEQUENCE[1..] {
                report.visited.push(*state);
            }
            debug!(?target, "tool change is a no-op");
            return Ok(report);
        }

        session.ensure_homed(&Axis::ALL)?;
        // 参考位置捕获：以固件确认的当前位置为准
        let saved = session.refresh_status()?.pose;
        info!(from = ?self.mounted, to = ?target, %saved, "starting tool change");

        match self.run_change(
            session,
            old_tool.as_ref(),
            new_tool.as_ref(),
            saved,
            travel_z,
            &mut report,
        ) {
            Ok(()) => {
                self.state = ChangeState::Idle;
                report.visited.push(ChangeState::Idle);
                info!(mounted = ?self.mounted, "tool change complete");
                Ok(report)
            }
            Err(source) => {
                let state = self.state;
                self.state = ChangeState::Faulted;
                Err(StationError::ToolChange {
                    state,
                    source: Box::new(source),
                })
            }
        }
    }

    fn run_change(
        &mut self,
        session: &mut MachineSession<'_>,
        old_tool: Option<&Tool>,
        new_tool: Option<&Tool>,
        saved: Pose,
        travel_z: f64,
        report: &mut ChangeReport,
    ) -> Result<()> {
        // FREEING：先抬 Z，再把旧刀送到停靠点，释放锁
        self.enter(ChangeState::Freeing, report);
        let mut group: Vec<GcodeCommand> = Vec::new();
        if saved.z < travel_z {
            group.push(gcode::linear_move(
                &[(Axis::Z, travel_z)],
                gcode::DEFAULT_TRAVEL_FEEDRATE,
            ));
        }
        if let Some(old) = old_tool {
            group.push(gcode::linear_move(
                &[(Axis::X, old.park.approach.x), (Axis::Y, old.park.approach.y)],
                gcode::DEFAULT_TRAVEL_FEEDRATE,
            ));
            group.push(gcode::linear_move(
                &[(Axis::X, old.park.park.x), (Axis::Y, old.park.park.y)],
                gcode::DEFAULT_TRAVEL_FEEDRATE,
            ));
            // 释放锁：提升电流反转回开锁角，随后回保持电流
            group.push(gcode::set_motor_current(Axis::U, old.lock.search_current_ma));
            group.push(gcode::linear_move(&[(Axis::U, 0.0)], LOCK_SEARCH_FEEDRATE));
            group.push(gcode::set_motor_current(Axis::U, old.lock.holding_current_ma));
        }
        session.issue_group(&group)?;

        // UNLOCKED_AT_PARK：停靠运动完成之后才通知固件旧刀失活
        self.enter(ChangeState::UnlockedAtPark, report);
        let mut group: Vec<GcodeCommand> = Vec::new();
        if let Some(old) = old_tool {
            group.push(gcode::deselect_tool());
            if old.narrow_z_limit {
                group.push(gcode::set_axis_limit(Axis::Z, 0.0, self.registry.z_max()));
            }
        }
        session.issue_group(&group)?;
        self.mounted = None;

        // TRAVELING_BARE：裸托架驶向新刀接近点
        self.enter(ChangeState::TravelingBare, report);
        let mut group: Vec<GcodeCommand> = Vec::new();
        if let Some(new) = new_tool {
            group.push(gcode::linear_move(
                &[(Axis::X, new.park.approach.x), (Axis::Y, new.park.approach.y)],
                gcode::DEFAULT_TRAVEL_FEEDRATE,
            ));
        }
        session.issue_group(&group)?;

        // PICKING：进入停靠点，力矩限位搜索旋转
        self.enter(ChangeState::Picking, report);
        if let Some(new) = new_tool {
            session.issue_group(&[
                gcode::linear_move(
                    &[(Axis::X, new.park.park.x), (Axis::Y, new.park.park.y)],
                    gcode::DEFAULT_TRAVEL_FEEDRATE,
                ),
                gcode::set_motor_current(Axis::U, new.lock.search_current_ma),
                gcode::linear_move(
                    &[(Axis::U, new.lock.search_rotation_deg)],
                    LOCK_SEARCH_FEEDRATE,
                ),
            ])?;
            // 堵转判定：确认后的 U 位置到达旋转上界即没有检出力矩限位
            let locked_at = session.refresh_status()?.pose.u;
            if locked_at >= new.lock.search_rotation_deg - LOCK_STALL_TOLERANCE_DEG {
                return Err(StationError::LockEngagement(format!(
                    "no torque limit within {:.1} deg rotation bound (tool {} may not be seated)",
                    new.lock.search_rotation_deg, new.name
                )));
            }
            session.issue_group(&[gcode::set_motor_current(
                Axis::U,
                new.lock.holding_current_ma,
            )])?;
            debug!(locked_at, "lock engaged");
        }

        // LOCKED：通知固件新刀激活；此后安全包络按新刀计算
        self.enter(ChangeState::Locked, report);
        let mut group: Vec<GcodeCommand> = Vec::new();
        if let Some(new) = new_tool {
            group.push(gcode::select_tool(new.index));
            if new.narrow_z_limit {
                group.push(gcode::set_axis_limit(
                    Axis::Z,
                    0.0,
                    self.registry.z_max() + new.offset.z,
                ));
            }
        }
        session.issue_group(&group)?;
        self.mounted = new_tool.map(|t| t.index);

        // RESTORING：经新偏移坐标系恢复，Z 先于 XY
        self.enter(ChangeState::Restoring, report);
        session.issue_group(&[
            gcode::linear_move(&[(Axis::Z, saved.z.max(travel_z))], gcode::DEFAULT_TRAVEL_FEEDRATE),
            gcode::linear_move(
                &[(Axis::X, saved.x), (Axis::Y, saved.y)],
                gcode::DEFAULT_TRAVEL_FEEDRATE,
            ),
        ])?;

        Ok(())
    }

    fn enter(&mut self, next: ChangeState, report: &mut ChangeReport) {
        debug_assert_eq!(self.state.next(), Some(next), "transition table violation");
        debug!(from = ?self.state, to = ?next, "tool change transition");
        self.state = next;
        report.visited.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{test_table, ToolRegistry};
    use jubilee_driver::{Machine, MachineBuilder};
    use jubilee_duet::{SimDuet, SimHandle};

    fn setup() -> (Machine, SimHandle, ToolChanger) {
        let sim = SimDuet::new();
        let handle = sim.handle();
        // 锁堵转角 120 度：力矩限位正常可检出
        handle.set_lock_stall(Some(120.0));
        let machine = MachineBuilder::new()
            .transport(Box::new(sim))
            .connect()
            .unwrap();
        {
            let mut session = machine.session().unwrap();
            session.home_all().unwrap();
            session
                .move_xyz_absolute(Some(150.0), Some(150.0), Some(80.0), true)
                .unwrap();
        }
        let registry = Arc::new(ToolRegistry::from_table(test_table()).unwrap());
        let changer = ToolChanger::new(registry);
        (machine, handle, changer)
    }

    #[test]
    fn test_full_state_sequence_for_every_pair() {
        let (machine, _handle, mut changer) = setup();
        let abort = AbortHandle::new();
        // 含 A->A 在内的全部组合都走完整序列
        let plans: [Option<u8>; 5] = [Some(0), Some(0), Some(1), None, None];
        for target in plans {
            let mut session = machine.session().unwrap();
            let report = changer
                .change_to(&mut session, target, 65.0, &abort)
                .unwrap();
            assert_eq!(report.visited, ChangeState::FULL_SEQUENCE.to_vec());
            assert_eq!(changer.mounted_tool(), target);
            assert_eq!(changer.state(), ChangeState::Idle);
        }
    }

    #[test]
    fn test_noop_change_issues_zero_commands() {
        let (machine, handle, mut changer) = setup();
        let abort = AbortHandle::new();
        {
            let mut session = machine.session().unwrap();
            changer.change_to(&mut session, Some(1), 65.0, &abort).unwrap();
        }
        handle.take_commands();
        let mut session = machine.session().unwrap();
        let report = changer.change_to(&mut session, Some(1), 65.0, &abort).unwrap();
        assert!(report.noop);
        assert_eq!(report.visited, ChangeState::FULL_SEQUENCE.to_vec());
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_park_motions_precede_deselect() {
        let (machine, handle, mut changer) = setup();
        let abort = AbortHandle::new();
        {
            let mut session = machine.session().unwrap();
            changer.change_to(&mut session, Some(0), 65.0, &abort).unwrap();
        }
        handle.take_commands();
        {
            let mut session = machine.session().unwrap();
            changer.change_to(&mut session, Some(1), 65.0, &abort).unwrap();
        }
        let log = handle.commands();
        let deselect_at = log.iter().position(|c| c == "T-1").unwrap();
        let select_at = log.iter().position(|c| c == "T1").unwrap();
        // 停靠运动（旧刀停靠点 y=341）在 T-1 之前
        let park_at = log
            .iter()
            .position(|c| c.starts_with("G0") && c.contains("Y341"))
            .unwrap();
        assert!(park_at < deselect_at);
        // 位置恢复（Z 运动）在 T1 之后，且先 Z 后 XY
        let restore_z_at = log[select_at..]
            .iter()
            .position(|c| c.starts_with("G0 Z"))
            .map(|i| i + select_at)
            .unwrap();
        let restore_xy_at = log[restore_z_at..]
            .iter()
            .position(|c| c.starts_with("G0 X"))
            .map(|i| i + restore_z_at)
            .unwrap();
        assert!(select_at < restore_z_at && restore_z_at < restore_xy_at);
    }

    #[test]
    fn test_lock_current_elevated_then_reduced() {
        let (machine, handle, mut changer) = setup();
        let abort = AbortHandle::new();
        {
            let mut session = machine.session().unwrap();
            changer.change_to(&mut session, Some(1), 65.0, &abort).unwrap();
        }
        let log = handle.commands();
        let search_at = log.iter().position(|c| c == "M906 U650").unwrap();
        let rotate_at = log.iter().position(|c| c.starts_with("G0 U160")).unwrap();
        let holding_at = log.iter().rposition(|c| c == "M906 U300").unwrap();
        assert!(search_at < rotate_at && rotate_at < holding_at);
        // 锁定后保持电流生效
        assert_eq!(handle.motor_current_u(), 300);
    }

    #[test]
    fn test_missing_tool_offset_fails_before_motion() {
        let (machine, handle, mut changer) = setup();
        let abort = AbortHandle::new();
        handle.take_commands();
        let mut session = machine.session().unwrap();
        let err = changer
            .change_to(&mut session, Some(7), 65.0, &abort)
            .unwrap_err();
        assert!(matches!(err, StationError::Configuration(_)));
        // 运动开始前失败：未发任何指令，状态机仍是 Idle
        assert!(handle.commands().is_empty());
        assert_eq!(changer.state(), ChangeState::Idle);
    }

    #[test]
    fn test_undetected_torque_limit_faults() {
        let (machine, handle, mut changer) = setup();
        let abort = AbortHandle::new();
        // 旋转畅通无阻：刀具未就位，搜索不到力矩限位
        handle.set_lock_stall(None);
        let mut session = machine.session().unwrap();
        let err = changer
            .change_to(&mut session, Some(1), 65.0, &abort)
            .unwrap_err();
        match err {
            StationError::ToolChange { state, source } => {
                assert_eq!(state, ChangeState::Picking);
                assert!(matches!(*source, StationError::LockEngagement(_)));
            }
            other => panic!("expected ToolChange wrapper, got {other:?}"),
        }
        assert_eq!(changer.state(), ChangeState::Faulted);
        // 故障后拒绝新的换刀
        drop(session);
        let mut session = machine.session().unwrap();
        assert!(matches!(
            changer.change_to(&mut session, Some(0), 65.0, &abort),
            Err(StationError::InvalidState {
                state: ChangeState::Faulted
            })
        ));
    }

    #[test]
    fn test_ack_timeout_during_picking_faults_machine() {
        let (machine, handle, mut changer) = setup();
        let abort = AbortHandle::new();
        // 首个 M906 提升电流出现在 Picking（裸托架起步，Freeing 无解锁）
        handle.timeout_on("M906 U650");
        {
            let mut session = machine.session().unwrap();
            let err = changer
                .change_to(&mut session, Some(1), 65.0, &abort)
                .unwrap_err();
            match err {
                StationError::ToolChange { state, .. } => {
                    assert_eq!(state, ChangeState::Picking)
                }
                other => panic!("expected ToolChange wrapper, got {other:?}"),
            }
        }
        assert_eq!(changer.state(), ChangeState::Faulted);
        assert!(machine.is_faulted());
    }

    #[test]
    fn test_operator_reset_restores_idle() {
        let (machine, handle, mut changer) = setup();
        let abort = AbortHandle::new();
        handle.set_lock_stall(None);
        {
            let mut session = machine.session().unwrap();
            let _ = changer.change_to(&mut session, Some(1), 65.0, &abort);
        }
        assert_eq!(changer.state(), ChangeState::Faulted);
        changer.reset(None);
        assert_eq!(changer.state(), ChangeState::Idle);
        assert_eq!(changer.mounted_tool(), None);
    }

    #[test]
    fn test_abort_checkpoint_before_change() {
        let (machine, handle, mut changer) = setup();
        let abort = AbortHandle::new();
        abort.request();
        handle.take_commands();
        let mut session = machine.session().unwrap();
        let err = changer
            .change_to(&mut session, Some(1), 65.0, &abort)
            .unwrap_err();
        assert!(matches!(err, StationError::Aborted { .. }));
        assert!(handle.commands().is_empty());
        assert_eq!(changer.state(), ChangeState::Idle);
    }
}
