//! 台面与安全模型
//!
//! 持有已加载的 labware 集合（位置、高度、孔网格），推导当前的
//! 安全行进高度 `safe_z` 与受控下探边界。`safe_z` 在 labware 集合
//! 变化时重算并缓存；执行器在每个操作前重新校验，而不是信任协议
//! 开始时的旧缓存。

use crate::error::StationError;
use crate::protocol::Operation;
use crate::tool::Tool;
use crate::types::Point2;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// 台面槽位数
pub const DECK_SLOT_COUNT: u8 = 6;

/// 各槽位的名义角点（快速接近用，来自机械 CAD）
pub const DECK_SLOT_NOMINAL_CORNERS: [Point2; DECK_SLOT_COUNT as usize] = [
    Point2 { x: 287.75, y: 289.75 },
    Point2 { x: 148.25, y: 289.5 },
    Point2 { x: 287.625, y: 192.25 },
    Point2 { x: 148.125, y: 192.0 },
    Point2 { x: 287.75, y: 94.688 },
    Point2 { x: 148.312, y: 94.5 },
];

/// 默认的安全间隙余量（mm，加在最高 labware 之上）
pub const DEFAULT_CLEARANCE_MARGIN: f64 = 10.0;

/// 机器空闲时的默认回抽高度（mm）
pub const DEFAULT_IDLE_Z: f64 = 300.0;

/// 孔数类别到（行数，列数）的映射
pub fn grid_for_well_count(well_count: u16) -> Option<(u8, u8)> {
    match well_count {
        96 => Some((8, 12)),
        48 => Some((6, 8)),
        24 => Some((4, 6)),
        12 => Some((3, 4)),
        6 => Some((2, 3)),
        _ => None,
    }
}

/// 行字母转 0 起始行号（'A' -> 0）
pub fn row_index_from_letter(letter: char) -> Option<u8> {
    let upper = letter.to_ascii_uppercase();
    upper.is_ascii_uppercase().then(|| upper as u8 - b'A')
}

/// 一块已加载的孔板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Labware {
    /// 孔数类别（6/12/24/48/96）
    pub well_count: u16,
    /// 三个示教角点：A1、A<末列>、<末行><末列> 的孔心
    pub corner_well_centroids: [Point2; 3],
    /// 板顶高度（mm，台面以上）
    pub height: f64,
}

impl Labware {
    /// 网格尺寸（行数，列数）
    pub fn grid(&self) -> Result<(u8, u8)> {
        grid_for_well_count(self.well_count).ok_or_else(|| {
            StationError::Configuration(format!(
                "unsupported well count {} (expected 6/12/24/48/96)",
                self.well_count
            ))
        })
    }

    /// 解析 0 起始的（行，列）为机器坐标
    ///
    /// 纯函数：同样的输入永远得到同样的坐标。孔距从示教角点推导，
    /// 两个冗余的旋转角测量取平均，容忍板的轻微摆放偏斜。
    pub fn well_position(&self, row: u8, column: u8) -> Result<Point2> {
        let (rows, columns) = self.grid()?;
        if row >= rows || column >= columns {
            return Err(StationError::OutOfRange {
                row_letter: (b'A' + row) as char,
                column: column + 1,
                rows,
                columns,
            });
        }

        let a = self.corner_well_centroids[0];
        let b = self.corner_well_centroids[1];
        let c = self.corner_well_centroids[2];

        let plate_width = a.distance_to(&b);
        let plate_depth = b.distance_to(&c);
        let x_spacing = plate_width / f64::from(columns - 1);
        let y_spacing = plate_depth / f64::from(rows - 1);

        let theta1 = ((c.y - b.y) / plate_depth).clamp(-1.0, 1.0).acos();
        let theta2 = ((b.x - a.x) / plate_width).clamp(-1.0, 1.0).acos();
        let theta = (theta1 + theta2) / 2.0;

        let x_nominal = f64::from(column) * x_spacing;
        let y_nominal = f64::from(row) * y_spacing;
        Ok(Point2 {
            x: x_nominal * theta.cos() - y_nominal * theta.sin() + a.x,
            y: x_nominal * theta.sin() + y_nominal * theta.cos() + a.y,
        })
    }
}

/// 清洗子例程配置
///
/// autoclean 触发时在操作之间执行的有界操作序列。序列内的操作
/// 禁止再带 autoclean，否则会无限递归。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningConfig {
    #[serde(default)]
    pub protocol: Vec<Operation>,
}

/// 台面配置的文件形态（JSON 持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckConfig {
    /// 槽位 -> labware
    #[serde(default)]
    pub plates: BTreeMap<u8, Labware>,
    /// safe_z 覆盖值（只允许高于推导值）
    #[serde(default)]
    pub safe_z: Option<f64>,
    /// 机器空闲时的回抽高度
    #[serde(default = "default_idle_z")]
    pub idle_z: f64,
    /// 间隙余量（加在最高 labware 之上）
    #[serde(default = "default_clearance_margin")]
    pub clearance_margin: f64,
    /// 清洗子例程
    #[serde(default)]
    pub cleaning: Option<CleaningConfig>,
}

fn default_idle_z() -> f64 {
    DEFAULT_IDLE_Z
}

fn default_clearance_margin() -> f64 {
    DEFAULT_CLEARANCE_MARGIN
}

impl Default for DeckConfig {
    fn default() -> Self {
        DeckConfig {
            plates: BTreeMap::new(),
            safe_z: None,
            idle_z: DEFAULT_IDLE_Z,
            clearance_margin: DEFAULT_CLEARANCE_MARGIN,
            cleaning: None,
        }
    }
}

/// 台面运行时模型（safe_z 缓存 + 校验入口）
#[derive(Debug, Clone)]
pub struct Deck {
    config: DeckConfig,
    /// 缓存的安全行进高度，labware 集合变化时重算
    safe_z: f64,
}

impl Deck {
    /// 从配置构建，校验并计算 safe_z
    pub fn new(config: DeckConfig) -> Result<Self> {
        let mut deck = Deck { config, safe_z: 0.0 };
        deck.validate_config()?;
        deck.recompute_safe_z()?;
        Ok(deck)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: DeckConfig = serde_json::from_str(&text)
            .map_err(|e| StationError::Configuration(format!("deck config parse error: {e}")))?;
        debug!(path = %path.display(), "loaded deck configuration");
        Self::new(config)
    }

    /// 保存到 JSON 文件（显式操作员动作）
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(&self.config)
            .map_err(|e| StationError::Configuration(format!("deck config encode error: {e}")))?;
        std::fs::write(path, text).map_err(|source| StationError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn validate_config(&self) -> Result<()> {
        for (slot, labware) in &self.config.plates {
            if *slot >= DECK_SLOT_COUNT {
                return Err(StationError::Configuration(format!(
                    "deck slot {slot} out of range (0..{DECK_SLOT_COUNT})"
                )));
            }
            labware.grid()?;
            if labware.height < 0.0 {
                return Err(StationError::Configuration(format!(
                    "labware in slot {slot} has negative height"
                )));
            }
        }
        if self.config.clearance_margin < 0.0 {
            return Err(StationError::Configuration(
                "clearance margin cannot be negative".to_string(),
            ));
        }
        if let Some(cleaning) = &self.config.cleaning {
            for op in &cleaning.protocol {
                if op.wants_autoclean() {
                    return Err(StationError::Configuration(
                        "cleaning protocol operations must not set autoclean".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// 重算并缓存 safe_z
    ///
    /// 不变量：safe_z 不低于（最高 labware 高度 + 间隙余量）。
    /// 覆盖值低于推导下界是配置错误，不静默接受。
    pub fn recompute_safe_z(&mut self) -> Result<f64> {
        let tallest = self
            .config
            .plates
            .values()
            .map(|p| p.height)
            .fold(0.0f64, f64::max);
        let derived = tallest + self.config.clearance_margin;
        let safe_z = match self.config.safe_z {
            Some(override_z) if override_z < derived => {
                return Err(StationError::Configuration(format!(
                    "safe_z override {override_z} is below derived minimum {derived}"
                )));
            }
            Some(override_z) => override_z,
            None => derived,
        };
        self.safe_z = safe_z;
        Ok(safe_z)
    }

    /// 当前安全行进高度
    pub fn safe_z(&self) -> f64 {
        self.safe_z
    }

    /// 空闲回抽高度
    pub fn idle_z(&self) -> f64 {
        self.config.idle_z
    }

    /// 是否有任何已加载的 labware
    pub fn is_occupied(&self) -> bool {
        !self.config.plates.is_empty()
    }

    /// 查找槽位上的 labware
    pub fn labware(&self, slot: u8) -> Result<&Labware> {
        self.config
            .plates
            .get(&slot)
            .ok_or(StationError::LabwareNotConfigured { slot })
    }

    /// 加载/替换槽位上的 labware（重算 safe_z）
    pub fn set_labware(&mut self, slot: u8, labware: Labware) -> Result<()> {
        if slot >= DECK_SLOT_COUNT {
            return Err(StationError::Configuration(format!(
                "deck slot {slot} out of range (0..{DECK_SLOT_COUNT})"
            )));
        }
        labware.grid()?;
        if self.config.plates.insert(slot, labware).is_some() {
            warn!(slot, "replacing existing labware configuration");
        }
        self.recompute_safe_z()?;
        Ok(())
    }

    /// 卸下槽位上的 labware（重算 safe_z）
    pub fn remove_labware(&mut self, slot: u8) -> Result<Option<Labware>> {
        let removed = self.config.plates.remove(&slot);
        self.recompute_safe_z()?;
        Ok(removed)
    }

    /// 解析孔位（0 起始行列）为机器坐标
    pub fn resolve_well_position(&self, slot: u8, row: u8, column: u8) -> Result<Point2> {
        self.labware(slot)?.well_position(row, column)
    }

    /// 校验一次行进运动
    ///
    /// 占用的台面上方，目标 Z 低于 safe_z 的行进一律拒绝。受控下探
    /// 不走这里，走 [`Deck::validate_plunge`]。
    pub fn validate_motion(&self, target_z: f64, mounted_tool: Option<&Tool>) -> Result<()> {
        if !self.is_occupied() {
            return Ok(());
        }
        if target_z < self.safe_z {
            let tool = mounted_tool.map_or("bare carriage", |t| t.name.as_str());
            return Err(StationError::Safety(format!(
                "travel at Z {target_z:.3} is below safe_z {:.3} with {tool} over an occupied deck",
                self.safe_z
            )));
        }
        Ok(())
    }

    /// 校验一次受控下探并返回下探目标 Z
    ///
    /// 下探深度自板顶量起，受 min(plunge_depth, 刀具最大插入深度)
    /// 约束；超出刀具上界或深过板底的请求拒绝。
    pub fn validate_plunge(&self, slot: u8, plunge_depth: f64, tool: &Tool) -> Result<f64> {
        let labware = self.labware(slot)?;
        if plunge_depth < 0.0 {
            return Err(StationError::Safety(
                "plunge depth cannot be negative".to_string(),
            ));
        }
        if plunge_depth > tool.max_insertion_depth {
            return Err(StationError::Safety(format!(
                "plunge depth {plunge_depth:.3} exceeds max insertion depth {:.3} of tool {}",
                tool.max_insertion_depth, tool.name
            )));
        }
        let target_z = labware.height - plunge_depth;
        if target_z < 0.0 {
            return Err(StationError::Safety(format!(
                "plunge depth {plunge_depth:.3} goes below the deck surface \
                 (labware top at {:.3})",
                labware.height
            )));
        }
        Ok(target_z)
    }

    /// 清洗子例程配置
    pub fn cleaning(&self) -> Option<&CleaningConfig> {
        self.config.cleaning.as_ref()
    }

    /// 设置清洗子例程（重新校验）
    pub fn set_cleaning(&mut self, cleaning: Option<CleaningConfig>) -> Result<()> {
        self.config.cleaning = cleaning;
        self.validate_config()
    }

    /// 底层配置（只读）
    pub fn config(&self) -> &DeckConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) fn plate_96(height: f64) -> Labware {
    // 9mm 孔距的标准 96 孔板，贴着名义角点摆放
    Labware {
        well_count: 96,
        corner_well_centroids: [
            Point2::new(200.0, 200.0),
            Point2::new(299.0, 200.0),
            Point2::new(299.0, 263.0),
        ],
        height,
    }
}
