//! 刀具与偏移坐标系管理
//!
//! 每把刀具的刀尖偏移（相对托架参考系）、停靠点、锁参数来自静态
//! TOML 配置表。偏移查询绝不静默回退为零：零偏移意味着物理碰撞
//! 风险，缺失注册是配置错误。
//!
//! 偏移的应用顺序由固件的 T 指令决定，状态机保证：
//! - 驶向停靠点的运动发生在通知固件旧刀失活（T-1）之前
//! - 位置恢复运动发生在通知固件新刀激活（T<n>）之后

use crate::error::StationError;
use crate::types::{Point2, Vec3};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 锁啮合参数
///
/// 锁定是一次力矩限位的单向旋转：以提升电流驱动锁轴，直到达到
/// 固定的小角度旋转上界或检出力矩限位，之后回落到保持电流。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockParams {
    /// 搜索旋转上界（度）
    pub search_rotation_deg: f64,
    /// 搜索期间的电机电流（mA，提升值）
    pub search_current_ma: u16,
    /// 锁定后的保持电流（mA，降低值）
    pub holding_current_ma: u16,
}

/// 停靠点对：接近点与锁定停靠点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParkPoints {
    pub approach: Point2,
    pub park: Point2,
}

/// 刀具挂载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Parked,
    Mounted,
}

/// 一把刀具的静态描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub index: u8,
    pub name: String,
    /// 最大安全插入深度（mm，自板顶向下）
    pub max_insertion_depth: f64,
    /// 挂载期间是否动态收窄 Z 行程上限
    ///
    /// 各刀具的恢复宏在这一点上历史不一致，按刀具配置而不是写死。
    #[serde(default)]
    pub narrow_z_limit: bool,
    /// 刀尖偏移（相对托架参考系）
    pub offset: Vec3,
    pub park: ParkPoints,
    pub lock: LockParams,
}

/// 刀具角色映射（操作种类到刀具的静态映射）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRoles {
    pub sonicator: u8,
    pub camera: Option<u8>,
}

/// TOML 配置表的文件形态
///
/// ```toml
/// [machine]
/// z_max = 300.0
///
/// [roles]
/// sonicator = 1
/// camera = 0
///
/// [[tool]]
/// index = 1
/// name = "sonicator"
/// offset = { x = 0.0, y = 43.0, z = -30.0 }
/// max_insertion_depth = 35.0
/// park = { approach = { x = 148.0, y = 330.0 }, park = { x = 148.0, y = 341.0 } }
/// lock = { search_rotation_deg = 160.0, search_current_ma = 650, holding_current_ma = 300 }
/// narrow_z_limit = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTable {
    pub machine: MachineLimits,
    pub roles: ToolRoles,
    #[serde(rename = "tool", default)]
    pub tools: Vec<Tool>,
}

/// 机器级行程限制
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MachineLimits {
    /// 裸托架的 Z 行程上限（mm）
    pub z_max: f64,
}

/// 刀具注册表（偏移坐标系管理器）
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<u8, Tool>,
    roles: ToolRoles,
    z_max: f64,
}

impl ToolRegistry {
    /// 从配置表构建，并做一致性校验
    pub fn from_table(table: ToolTable) -> Result<Self> {
        let mut tools = BTreeMap::new();
        for tool in table.tools {
            if tool.max_insertion_depth < 0.0 {
                return Err(StationError::Configuration(format!(
                    "tool {} has negative max_insertion_depth",
                    tool.index
                )));
            }
            if tool.lock.search_rotation_deg <= 0.0 {
                return Err(StationError::Configuration(format!(
                    "tool {} has non-positive lock search rotation",
                    tool.index
                )));
            }
            if tool.lock.holding_current_ma > tool.lock.search_current_ma {
                return Err(StationError::Configuration(format!(
                    "tool {}: holding current exceeds search current",
                    tool.index
                )));
            }
            if tools.insert(tool.index, tool).is_some() {
                return Err(StationError::Configuration(
                    "duplicate tool index in tool table".to_string(),
                ));
            }
        }
        let registry = ToolRegistry {
            tools,
            roles: table.roles,
            z_max: table.machine.z_max,
        };
        // 角色必须指向已注册的刀具
        registry.get(registry.roles.sonicator)?;
        if let Some(camera) = registry.roles.camera {
            registry.get(camera)?;
        }
        Ok(registry)
    }

    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table: ToolTable = toml::from_str(&text)
            .map_err(|e| StationError::Configuration(format!("tool table parse error: {e}")))?;
        Self::from_table(table)
    }

    /// 查找刀具；未注册即配置错误
    pub fn get(&self, index: u8) -> Result<&Tool> {
        self.tools.get(&index).ok_or_else(|| {
            StationError::Configuration(format!("tool {index} has no registered offset"))
        })
    }

    /// 刀尖偏移向量
    pub fn offset_of(&self, index: u8) -> Result<Vec3> {
        Ok(self.get(index)?.offset)
    }

    /// 停靠点对（接近点，锁定停靠点）
    pub fn park_points_of(&self, index: u8) -> Result<(Point2, Point2)> {
        let park = self.get(index)?.park;
        Ok((park.approach, park.park))
    }

    /// sonicate 操作所需的刀具
    pub fn sonicator_tool(&self) -> u8 {
        self.roles.sonicator
    }

    /// 裸托架 Z 行程上限
    pub fn z_max(&self) -> f64 {
        self.z_max
    }

    /// 已注册的全部刀具
    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }
}

#[cfg(test)]
pub(crate) fn test_table() -> ToolTable {
    ToolTable {
        machine: MachineLimits { z_max: 300.0 },
        roles: ToolRoles {
            sonicator: 1,
            camera: Some(0),
        },
        tools: vec![
            Tool {
                index: 0,
                name: "camera".to_string(),
                offset: Vec3::new(0.0, 20.0, -18.0),
                max_insertion_depth: 0.0,
                park: ParkPoints {
                    approach: Point2::new(287.0, 330.0),
                    park: Point2::new(287.0, 341.0),
                },
                lock: LockParams {
                    search_rotation_deg: 160.0,
                    search_current_ma: 650,
                    holding_current_ma: 300,
                },
                narrow_z_limit: false,
            },
            Tool {
                index: 1,
                name: "sonicator".to_string(),
                offset: Vec3::new(0.0, 43.0, -30.0),
                max_insertion_depth: 35.0,
                park: ParkPoints {
                    approach: Point2::new(148.0, 330.0),
                    park: Point2::new(148.0, 341.0),
                },
                lock: LockParams {
                    search_rotation_deg: 160.0,
                    search_current_ma: 650,
                    holding_current_ma: 300,
                },
                narrow_z_limit: true,
            },
        ],
    }
}
