//! Machine Builder
//!
//! 连接阶段的配置入口：传输后端、固件版本要求。

use crate::error::DriverError;
use crate::machine::Machine;
use crate::Result;
use jubilee_duet::{Transport, TransportError};
use jubilee_gcode as gcode;
use tracing::info;

/// 最低兼容固件版本（RRF3 对象模型查询自此可用）
const DEFAULT_FIRMWARE_REQ: &str = ">=3.3.0";

/// Machine 构建器
///
/// # 示例
///
/// ```rust,no_run
/// use jubilee_driver::MachineBuilder;
/// use jubilee_duet::SimDuet;
///
/// let machine = MachineBuilder::new()
///     .transport(Box::new(SimDuet::new()))
///     .connect()
///     .expect("connect failed");
/// ```
pub struct MachineBuilder {
    transport: Option<Box<dyn Transport>>,
    firmware_req: semver::VersionReq,
    check_firmware: bool,
}

impl Default for MachineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineBuilder {
    pub fn new() -> Self {
        MachineBuilder {
            transport: None,
            firmware_req: semver::VersionReq::parse(DEFAULT_FIRMWARE_REQ)
                .unwrap_or(semver::VersionReq::STAR),
            check_firmware: true,
        }
    }

    /// 设置传输后端
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 覆盖固件版本要求
    pub fn firmware_requirement(mut self, req: semver::VersionReq) -> Self {
        self.firmware_req = req;
        self
    }

    /// 跳过固件版本检查（调试用）
    pub fn skip_firmware_check(mut self) -> Self {
        self.check_firmware = false;
        self
    }

    /// 建立连接
    ///
    /// 连接流程：查询固件版本并校验兼容性，读取初始位置与归位标志，
    /// 强制绝对坐标模式。
    pub fn connect(self) -> Result<Machine> {
        let mut transport = self.transport.ok_or_else(|| {
            DriverError::Transport(TransportError::NotReady(
                "no transport configured".to_string(),
            ))
        })?;

        // 固件版本握手，兼作连通性探测
        let ack = transport.exchange(&gcode::query_firmware())?;
        let banner = ack.reply.as_deref().unwrap_or_default();
        let version = gcode::parse_firmware_version(banner)?;
        if self.check_firmware && !self.firmware_req.matches(&version) {
            return Err(DriverError::FirmwareTooOld {
                found: version.to_string(),
                required: self.firmware_req.to_string(),
            });
        }
        info!(%version, "connected to firmware");

        let machine = Machine::new(transport, version);
        let mut session = machine.session()?;
        session.set_absolute(true)?;
        session.refresh_status()?;
        drop(session);
        Ok(machine)
    }
}
