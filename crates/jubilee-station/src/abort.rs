//! 操作员中止
//!
//! 中止只在安全检查点生效：操作边界，以及换刀开始前。落在不安全
//! 窗口（如锁啮合期间）的中止请求被推迟到下一个检查点，机器停在
//! 明确报告的可恢复状态。

use crate::StationError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// 可克隆的中止句柄（ctrlc 处理器与监控方共用）
#[derive(Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求中止（任意线程可调用，立即返回）
    pub fn request(&self) {
        warn!("operator abort requested; will take effect at next checkpoint");
        self.flag.store(true, Ordering::Release);
    }

    /// 是否有未消费的中止请求
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 清除请求（新一轮执行开始前）
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// 安全检查点：有中止请求则消费并停止执行
    pub fn checkpoint(&self, checkpoint: &'static str) -> crate::Result<()> {
        if self.flag.swap(false, Ordering::AcqRel) {
            return Err(StationError::Aborted { checkpoint });
        }
        Ok(())
    }
}
