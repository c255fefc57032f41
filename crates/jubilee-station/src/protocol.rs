//! 声明式协议
//!
//! 协议是一个有序的操作列表，整体加载后严格按序执行，失败后不可
//! 从中间恢复。操作种类是一个封闭的多态集合，统一实现
//! `(台面, 刀具表) -> 步骤序列` 的规划契约：新增操作种类不需要
//! 改动执行器的控制流。
//!
//! 文件格式（JSON）：
//! `[{"operation": "sonicate_well", "specs": {"deck_index": 5, ...}}]`

use crate::deck::{row_index_from_letter, Deck};
use crate::error::StationError;
use crate::sonicator::SonicationSpec;
use crate::tool::ToolRegistry;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 协议中的一个操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "specs", rename_all = "snake_case")]
pub enum Operation {
    /// 在指定孔位下探超声
    SonicateWell(SonicateWellSpec),
}

/// sonicate_well 的参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SonicateWellSpec {
    /// 台面槽位
    pub deck_index: u8,
    /// 行字母（'A' 起）
    pub row_letter: char,
    /// 列号（1 起始）
    pub column_index: u8,
    /// 下探深度（mm，自板顶量起）
    pub plunge_depth: f64,
    /// 驻留时间（秒）
    pub seconds: f64,
    /// 功率（缺省 0.4）
    #[serde(default)]
    pub power: Option<f64>,
    /// 脉冲占空比（缺省 0.5）
    #[serde(default)]
    pub pulse_duty_cycle: Option<f64>,
    /// 脉冲周期（缺省 1 秒，不超过总时间）
    #[serde(default)]
    pub pulse_interval: Option<f64>,
    /// 驻留后是否执行清洗子例程
    #[serde(default)]
    pub autoclean: bool,
}

impl SonicateWellSpec {
    /// 应用缺省值后的超声参数
    pub fn sonication(&self) -> SonicationSpec {
        SonicationSpec {
            seconds: self.seconds,
            power: self.power.unwrap_or(SonicationSpec::DEFAULT_POWER),
            pulse_duty_cycle: self
                .pulse_duty_cycle
                .unwrap_or(SonicationSpec::DEFAULT_DUTY_CYCLE),
            pulse_interval: self
                .pulse_interval
                .unwrap_or(SonicationSpec::DEFAULT_PULSE_INTERVAL.min(self.seconds)),
        }
    }
}

/// 规划出的一个执行步骤
///
/// 执行器逐步执行，每步等传输确认后才进入下一步。
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// 要求挂载指定刀具（不同则触发换刀）
    RequireTool { tool: u8 },
    /// 在安全高度行进到孔位上方
    TravelTo { x: f64, y: f64, travel_z: f64 },
    /// 受控下探到目标 Z
    Plunge { z: f64 },
    /// 驻留超声
    Sonicate { spec: SonicationSpec },
    /// 回抽到安全高度
    Retract { z: f64 },
    /// 执行清洗子例程
    Clean,
}

impl Operation {
    /// 操作是否请求 autoclean
    pub fn wants_autoclean(&self) -> bool {
        match self {
            Operation::SonicateWell(spec) => spec.autoclean,
        }
    }

    /// 操作所需的刀具（静态操作到刀具映射）
    pub fn required_tool(&self, tools: &ToolRegistry) -> u8 {
        match self {
            Operation::SonicateWell(_) => tools.sonicator_tool(),
        }
    }

    /// 规划为步骤序列
    ///
    /// 确定性：同样的台面配置与刀具表，同一个操作总是规划出同样的
    /// 步骤序列，与机器当前位置无关。
    pub fn plan(&self, deck: &Deck, tools: &ToolRegistry) -> Result<Vec<Step>> {
        match self {
            Operation::SonicateWell(spec) => {
                let tool_index = tools.sonicator_tool();
                let tool = tools.get(tool_index)?;

                let labware = deck.labware(spec.deck_index)?;
                let (rows, columns) = labware.grid()?;
                let row = row_index_from_letter(spec.row_letter).ok_or_else(|| {
                    StationError::Configuration(format!(
                        "invalid row letter {:?}",
                        spec.row_letter
                    ))
                })?;
                let column = spec.column_index.checked_sub(1).ok_or(
                    StationError::OutOfRange {
                        row_letter: spec.row_letter,
                        column: 0,
                        rows,
                        columns,
                    },
                )?;
                let well = deck.resolve_well_position(spec.deck_index, row, column)?;

                let sonication = spec.sonication();
                sonication.validate()?;
                let plunge_z = deck.validate_plunge(spec.deck_index, spec.plunge_depth, tool)?;
                let travel_z = deck.safe_z();

                let mut steps = vec![
                    Step::RequireTool { tool: tool_index },
                    Step::TravelTo {
                        x: well.x,
                        y: well.y,
                        travel_z,
                    },
                    Step::Plunge { z: plunge_z },
                    Step::Sonicate { spec: sonication },
                    Step::Retract { z: travel_z },
                ];
                if spec.autoclean {
                    steps.push(Step::Clean);
                }
                Ok(steps)
            }
        }
    }
}

/// 一个已加载的协议（执行前整体加载，执行期间不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Protocol {
    operations: Vec<Operation>,
}

impl Protocol {
    pub fn new(operations: Vec<Operation>) -> Self {
        Protocol { operations }
    }

    /// 从 JSON 文本整体加载
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| StationError::Configuration(format!("protocol parse error: {e}")))
    }

    /// 从文件整体加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
impl Operation {
    /// 测试用速构
    pub(crate) fn sonicate_for_test(
        deck_index: u8,
        row_letter: char,
        column_index: u8,
        plunge_depth: f64,
        seconds: f64,
        autoclean: bool,
    ) -> Operation {
        Operation::SonicateWell(SonicateWellSpec {
            deck_index,
            row_letter,
            column_index,
            plunge_depth,
            seconds,
            power: None,
            pulse_duty_cycle: None,
            pulse_interval: None,
            autoclean,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::{plate_96, DeckConfig};
    use crate::tool::{test_table, ToolRegistry};

    fn deck() -> Deck {
        let mut config = DeckConfig::default();
        config.plates.insert(5, plate_96(20.0));
        config.safe_z = Some(65.0);
        Deck::new(config).unwrap()
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::from_table(test_table()).unwrap()
    }

    #[test]
    fn test_protocol_file_format() {
        let json = r#"[{"operation": "sonicate_well",
                        "specs": {"deck_index": 5, "row_letter": "A", "column_index": 1,
                                  "plunge_depth": 10.0, "seconds": 3.0, "autoclean": false}}]"#;
        let protocol = Protocol::from_json(json).unwrap();
        assert_eq!(protocol.len(), 1);
        match &protocol.operations()[0] {
            Operation::SonicateWell(spec) => {
                assert_eq!(spec.deck_index, 5);
                assert_eq!(spec.row_letter, 'A');
                assert_eq!(spec.column_index, 1);
                assert_eq!(spec.plunge_depth, 10.0);
                assert!(!spec.autoclean);
                // 未给出的功率/脉冲参数取缺省
                let sonication = spec.sonication();
                assert_eq!(sonication.power, SonicationSpec::DEFAULT_POWER);
            }
        }
    }

    #[test]
    fn test_protocol_serde_round_trip() {
        let protocol = Protocol::new(vec![Operation::sonicate_for_test(5, 'B', 3, 8.0, 2.0, true)]);
        let json = serde_json::to_string(&protocol).unwrap();
        assert!(json.contains("\"operation\":\"sonicate_well\""));
        assert!(json.contains("\"specs\""));
        assert_eq!(Protocol::from_json(&json).unwrap(), protocol);
    }

    #[test]
    fn test_plan_shape_for_sonicate_well() {
        let deck = deck();
        let registry = registry();
        let op = Operation::sonicate_for_test(5, 'A', 1, 10.0, 3.0, false);
        let steps = op.plan(&deck, &registry).unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], Step::RequireTool { tool: 1 });
        match steps[1] {
            Step::TravelTo { travel_z, .. } => assert_eq!(travel_z, 65.0),
            ref other => panic!("expected TravelTo, got {other:?}"),
        }
        // 板顶 20mm，下探 10mm：目标 Z 恰好 10mm
        assert_eq!(steps[2], Step::Plunge { z: 10.0 });
        assert_eq!(steps[4], Step::Retract { z: 65.0 });
    }

    #[test]
    fn test_plan_appends_clean_when_autoclean() {
        let deck = deck();
        let registry = registry();
        let op = Operation::sonicate_for_test(5, 'A', 1, 10.0, 3.0, true);
        let steps = op.plan(&deck, &registry).unwrap();
        assert_eq!(steps.last(), Some(&Step::Clean));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let deck = deck();
        let registry = registry();
        let op = Operation::sonicate_for_test(5, 'C', 7, 12.0, 4.0, true);
        let first = op.plan(&deck, &registry).unwrap();
        let second = op.plan(&deck, &registry).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_plan_requires_configured_labware() {
        let deck = deck();
        let registry = registry();
        let op = Operation::sonicate_for_test(2, 'A', 1, 10.0, 3.0, false);
        assert!(matches!(
            op.plan(&deck, &registry),
            Err(StationError::LabwareNotConfigured { slot: 2 })
        ));
    }

    #[test]
    fn test_plan_rejects_out_of_grid_well() {
        let deck = deck();
        let registry = registry();
        // 96 孔板只有 8 行（A-H）
        let op = Operation::sonicate_for_test(5, 'J', 1, 10.0, 3.0, false);
        assert!(matches!(
            op.plan(&deck, &registry),
            Err(StationError::OutOfRange { .. })
        ));
        // 列号 0（1 起始）
        let op = Operation::sonicate_for_test(5, 'A', 0, 10.0, 3.0, false);
        assert!(matches!(
            op.plan(&deck, &registry),
            Err(StationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_default_pulse_interval_clamped_to_short_dwell() {
        let spec = SonicateWellSpec {
            deck_index: 5,
            row_letter: 'A',
            column_index: 1,
            plunge_depth: 10.0,
            seconds: 0.5,
            power: None,
            pulse_duty_cycle: None,
            pulse_interval: None,
            autoclean: false,
        };
        let sonication = spec.sonication();
        assert_eq!(sonication.pulse_interval, 0.5);
        assert!(sonication.validate().is_ok());
    }
}
