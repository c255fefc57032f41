//! 协议执行器
//!
//! 按序消费协议操作。对每个操作：解析目标孔位与所需刀具，必要时
//! 同步换刀并阻塞到 `Locked`/`Idle` 或故障，下探前校验安全包络，
//! 依次发出行进、下探、驻留、回抽，每步等传输确认；autoclean 时
//! 在进入下一操作前执行清洗子例程。
//!
//! 任一步失败即中止剩余协议（不跳过、不静默继续），报告失败操作
//! 的下标、失败时的换刀状态（如适用）与错误种类。归位前置条件在
//! 协议开始时检查一次，未归位立即失败，不发出任何传输指令。

use crate::abort::AbortHandle;
use crate::deck::Deck;
use crate::error::StationError;
use crate::protocol::{Operation, Protocol, SonicateWellSpec, Step};
use crate::sonicator::Sonicator;
use crate::tool::{Tool, ToolRegistry};
use crate::toolchange::{ChangeReport, ChangeState, ToolChanger};
use crate::Result;
use jubilee_driver::Machine;
use jubilee_gcode::{Axis, PLUNGE_FEEDRATE};
use std::sync::Arc;
use tracing::{info, warn};

/// 工作站：协议执行与交互操作的统一入口
///
/// 交互 shell 与协议文件走同一套状态机和安全模型，不存在绕过
/// 安全校验的指令路径。
pub struct Station {
    machine: Arc<Machine>,
    tools: Arc<ToolRegistry>,
    deck: Deck,
    changer: ToolChanger,
    sonicator: Box<dyn Sonicator>,
    abort: AbortHandle,
}

impl Station {
    pub fn new(
        machine: Arc<Machine>,
        tools: Arc<ToolRegistry>,
        deck: Deck,
        sonicator: Box<dyn Sonicator>,
    ) -> Self {
        let changer = ToolChanger::new(tools.clone());
        Station {
            machine,
            tools,
            deck,
            changer,
            sonicator,
            abort: AbortHandle::new(),
        }
    }

    /// 中止句柄（交给 ctrlc 处理器或监控方）
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    /// 台面配置入口（协议执行期间台面只读，由 `&mut self` 保证）
    pub fn deck_mut(&mut self) -> &mut Deck {
        &mut self.deck
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// 当前挂载的刀具
    pub fn mounted_tool(&self) -> Option<u8> {
        self.changer.mounted_tool()
    }

    /// 换刀状态机当前状态
    pub fn change_state(&self) -> ChangeState {
        self.changer.state()
    }

    // ==================== 交互原语 ====================

    /// 换刀（shell 与执行器共用同一状态机）
    pub fn change_tool(&mut self, target: Option<u8>) -> Result<ChangeReport> {
        let machine = self.machine.clone();
        let mut session = machine.session()?;
        self.changer
            .change_to(&mut session, target, self.deck.safe_z(), &self.abort)
    }

    /// 停靠当前刀具
    pub fn park_tool(&mut self) -> Result<ChangeReport> {
        self.change_tool(None)
    }

    /// 归位全部轴（先停靠已挂载的刀具），随后回抽到空闲高度
    pub fn home_all(&mut self) -> Result<()> {
        if self.changer.mounted_tool().is_some() {
            self.park_tool()?;
        }
        let machine = self.machine.clone();
        let mut session = machine.session()?;
        session.home_all()?;
        session.move_xyz_absolute(None, None, Some(self.deck.idle_z()), true)?;
        Ok(())
    }

    /// 安全行进（交互入口）
    ///
    /// 横移前先回抽到 safe_z；显式给出的目标 Z 过台面包络校验。
    pub fn move_to(&mut self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<()> {
        self.ensure_ready()?;
        if let Some(z) = z {
            self.deck.validate_motion(z, self.mounted_tool_ref()?)?;
        }
        let machine = self.machine.clone();
        let mut session = machine.session()?;
        if x.is_some() || y.is_some() {
            session.move_xyz_absolute(None, None, Some(self.deck.safe_z()), false)?;
            session.move_xyz_absolute(x, y, None, false)?;
        }
        if z.is_some() {
            session.move_xyz_absolute(None, None, z, false)?;
        }
        session.wait_until_idle()?;
        Ok(())
    }

    /// 单个孔位超声（交互入口，与协议执行同一代码路径）
    pub fn sonicate_well(&mut self, spec: SonicateWellSpec) -> Result<()> {
        self.ensure_ready()?;
        self.run_operation(&Operation::SonicateWell(spec))
    }

    /// 立即执行清洗子例程
    pub fn clean_tool(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.run_clean_routine()
    }

    /// 操作员复位：固件复位、清除故障锁存、按固件报告重验挂载状态
    ///
    /// 复位后归位标志清空，执行协议前必须重新归位。
    pub fn operator_reset(&mut self) -> Result<()> {
        self.machine.operator_reset()?;
        let machine = self.machine.clone();
        let mut session = machine.session()?;
        let active = session.query_active_tool()?;
        drop(session);
        self.changer.reset(active);
        self.abort.clear();
        Ok(())
    }

    // ==================== 协议执行 ====================

    /// 按序执行一个协议
    pub fn execute(&mut self, protocol: &Protocol) -> Result<()> {
        self.ensure_ready()?;

        // 归位前置条件只查缓存快照：未归位立即失败，零传输指令
        if !self.machine.snapshot().all_homed() {
            return Err(StationError::NotHomed);
        }

        info!(operations = protocol.len(), "executing protocol");
        for (index, operation) in protocol.operations().iter().enumerate() {
            self.abort.checkpoint("operation boundary")?;
            info!(index, "starting operation");
            self.run_operation(operation)
                .map_err(|e| e.at_operation(index))?;
        }
        info!("protocol complete");
        Ok(())
    }

    /// 机器与状态机都必须处于可执行状态
    fn ensure_ready(&self) -> Result<()> {
        if self.machine.is_faulted() {
            return Err(StationError::Faulted(
                self.machine
                    .fault_reason()
                    .unwrap_or_else(|| "unknown fault".to_string()),
            ));
        }
        if self.changer.state() == ChangeState::Faulted {
            return Err(StationError::Faulted(
                "tool changer is faulted; operator reset required".to_string(),
            ));
        }
        Ok(())
    }

    fn mounted_tool_ref(&self) -> Result<Option<&Tool>> {
        self.changer
            .mounted_tool()
            .map(|index| self.tools.get(index))
            .transpose()
    }

    fn run_operation(&mut self, operation: &Operation) -> Result<()> {
        // 每个操作前重算并重校验包络，不信任协议开始时的缓存
        self.deck.recompute_safe_z()?;
        let steps = operation.plan(&self.deck, &self.tools)?;
        for step in steps {
            self.run_step(&step)?;
        }
        Ok(())
    }

    fn run_step(&mut self, step: &Step) -> Result<()> {
        match *step {
            Step::RequireTool { tool } => {
                if self.changer.mounted_tool() != Some(tool) {
                    let machine = self.machine.clone();
                    let mut session = machine.session()?;
                    self.changer.change_to(
                        &mut session,
                        Some(tool),
                        self.deck.safe_z(),
                        &self.abort,
                    )?;
                }
                Ok(())
            }
            Step::TravelTo { x, y, travel_z } => {
                self.deck
                    .validate_motion(travel_z, self.mounted_tool_ref()?)?;
                let machine = self.machine.clone();
                let mut session = machine.session()?;
                // 先回抽到安全高度，再横移
                session.move_xyz_absolute(None, None, Some(travel_z), false)?;
                session.move_xyz_absolute(Some(x), Some(y), None, true)?;
                Ok(())
            }
            Step::Plunge { z } => {
                let machine = self.machine.clone();
                let mut session = machine.session()?;
                session.move_axis_absolute(Axis::Z, z, PLUNGE_FEEDRATE)?;
                Ok(())
            }
            Step::Sonicate { ref spec } => self.sonicator.sonicate(spec),
            Step::Retract { z } => {
                let machine = self.machine.clone();
                let mut session = machine.session()?;
                session.move_xyz_absolute(None, None, Some(z), true)?;
                Ok(())
            }
            Step::Clean => self.run_clean_routine(),
        }
    }

    /// 清洗子例程：有界，序列内禁止再触发 autoclean
    fn run_clean_routine(&mut self) -> Result<()> {
        let Some(cleaning) = self.deck.cleaning().cloned() else {
            return Err(StationError::Configuration(
                "no cleaning station configured".to_string(),
            ));
        };
        if cleaning.protocol.is_empty() {
            warn!("cleaning routine is empty; nothing to do");
            return Ok(());
        }
        info!(steps = cleaning.protocol.len(), "running clean routine");
        for operation in &cleaning.protocol {
            // 加载时已校验；这里再挡一道，防止配置被绕过后无限递归
            if operation.wants_autoclean() {
                return Err(StationError::Configuration(
                    "cleaning protocol operations must not set autoclean".to_string(),
                ));
            }
            self.run_operation(operation)?;
        }
        Ok(())
    }
}
