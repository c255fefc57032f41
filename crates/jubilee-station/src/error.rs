//! 工作站层错误类型定义
//!
//! 错误分类：
//! - `Configuration`：静态刀具/台面数据缺失或非法，修配置后重启
//! - `NotHomed`：前置条件违反，操作员先归位再重试
//! - `Safety` / `LabwareNotConfigured` / `OutOfRange`：请求的运动或
//!   孔位引用违反安全包络或台面配置，当前操作中止、协议停止
//! - `LockEngagement`：锁力矩限位未在旋转上界内检出，进入故障锁存，
//!   需要人工检查刀具就位
//! - `InvalidState` / `Faulted`：状态机拒绝重叠换刀 / 机器故障锁存
//! - `Aborted`：操作员在安全检查点中止

use crate::toolchange::ChangeState;
use jubilee_driver::DriverError;
use thiserror::Error;

/// 工作站层错误类型
#[derive(Error, Debug)]
pub enum StationError {
    /// 静态配置缺失或非法（致命，修配置后重启）
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 归位前置条件违反
    #[error("Machine must first be homed")]
    NotHomed,

    /// 运动会违反安全包络
    #[error("Safety violation: {0}")]
    Safety(String),

    /// 引用的台面槽位没有配置 labware
    #[error("Deck slot {slot} has no labware configured")]
    LabwareNotConfigured { slot: u8 },

    /// 孔位行/列超出配置的网格
    #[error("Well {row_letter}{column} is out of range for a {rows}x{columns} plate")]
    OutOfRange {
        row_letter: char,
        column: u8,
        rows: u8,
        columns: u8,
    },

    /// 锁力矩限位未在旋转上界内检出（刀具可能未正确就位）
    #[error("Lock engagement failed: {0}")]
    LockEngagement(String),

    /// 换刀状态机非 IDLE 时拒绝新的换刀
    #[error("Tool change refused: state machine is {state:?}, not Idle")]
    InvalidState { state: ChangeState },

    /// 机器处于故障锁存状态，需要操作员复位
    #[error("Machine faulted: {0}")]
    Faulted(String),

    /// 操作员在安全检查点中止
    #[error("Aborted by operator at checkpoint: {checkpoint}")]
    Aborted { checkpoint: &'static str },

    /// 换刀失败（携带失败时的状态机状态）
    #[error("Tool change failed in state {state:?}: {source}")]
    ToolChange {
        state: ChangeState,
        #[source]
        source: Box<StationError>,
    },

    /// 协议中某个操作失败（携带操作下标，其后的操作不再执行）
    #[error("Operation {index} failed: {source}")]
    Operation {
        index: usize,
        #[source]
        source: Box<StationError>,
    },

    /// 配置/协议文件 IO 失败
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 驱动层错误
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl StationError {
    /// 包装为协议操作失败
    pub(crate) fn at_operation(self, index: usize) -> StationError {
        StationError::Operation {
            index,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wrapping_keeps_cause() {
        let err = StationError::LabwareNotConfigured { slot: 5 }.at_operation(0);
        let msg = format!("{err}");
        assert!(msg.contains("Operation 0"));
        match err {
            StationError::Operation { index, source } => {
                assert_eq!(index, 0);
                assert!(matches!(
                    *source,
                    StationError::LabwareNotConfigured { slot: 5 }
                ));
            }
            _ => panic!("expected Operation wrapper"),
        }
    }

    #[test]
    fn test_out_of_range_display() {
        let err = StationError::OutOfRange {
            row_letter: 'J',
            column: 13,
            rows: 8,
            columns: 12,
        };
        assert!(format!("{err}").contains("J13"));
    }
}
