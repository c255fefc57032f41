//! 超声探头控制
//!
//! 驻留（dwell）期间按占空比执行通断脉冲串。脉冲计划是纯函数，
//! 与实际计时解耦；真实硬件（DAC 功率 + 使能线）藏在
//! [`SonicatorDriver`] 后面，测试与模拟不需要硬件也不需要真实等待。

use crate::error::StationError;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 一次超声驻留的参数
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SonicationSpec {
    /// 总驻留时间（秒）
    pub seconds: f64,
    /// 功率（0.4 到 1.0；低于 0.4 探头不起振）
    pub power: f64,
    /// 脉冲占空比（0.0 到 1.0）
    pub pulse_duty_cycle: f64,
    /// 脉冲周期（秒，> 0 且不超过总时间）
    pub pulse_interval: f64,
}

impl SonicationSpec {
    /// 探头起振的最低功率
    pub const MIN_EFFECTIVE_POWER: f64 = 0.4;

    /// 默认功率
    pub const DEFAULT_POWER: f64 = 0.4;
    /// 默认占空比
    pub const DEFAULT_DUTY_CYCLE: f64 = 0.5;
    /// 默认脉冲周期（秒）
    pub const DEFAULT_PULSE_INTERVAL: f64 = 1.0;

    /// 参数边界校验
    pub fn validate(&self) -> Result<()> {
        if self.seconds <= 0.0 {
            return Err(StationError::Configuration(format!(
                "sonication time must be positive, got {}",
                self.seconds
            )));
        }
        if !(Self::MIN_EFFECTIVE_POWER..=1.0).contains(&self.power) {
            return Err(StationError::Configuration(format!(
                "sonication power must be in [{}, 1.0], got {}",
                Self::MIN_EFFECTIVE_POWER,
                self.power
            )));
        }
        if !(0.0..=1.0).contains(&self.pulse_duty_cycle) {
            return Err(StationError::Configuration(format!(
                "pulse duty cycle must be in [0.0, 1.0], got {}",
                self.pulse_duty_cycle
            )));
        }
        if self.pulse_interval <= 0.0 || self.pulse_interval > self.seconds {
            return Err(StationError::Configuration(format!(
                "pulse interval must be in (0.0, {}], got {}",
                self.seconds, self.pulse_interval
            )));
        }
        Ok(())
    }

    /// 展开为通/断脉冲计划（纯函数）
    ///
    /// 每个周期先通后断；最后一个周期截断到总时间。
    pub fn pulse_train(&self) -> Vec<Pulse> {
        let on_interval = self.pulse_duty_cycle * self.pulse_interval;
        let off_interval = self.pulse_interval - on_interval;
        let mut pulses = Vec::new();
        let mut elapsed = 0.0f64;
        while elapsed < self.seconds {
            let on = on_interval.min(self.seconds - elapsed);
            elapsed += on;
            let off = off_interval.min(self.seconds - elapsed);
            elapsed += off;
            pulses.push(Pulse {
                on: Duration::from_secs_f64(on),
                off: Duration::from_secs_f64(off),
            });
            if on_interval + off_interval <= 0.0 {
                break;
            }
        }
        pulses
    }
}

/// 一个通/断脉冲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub on: Duration,
    pub off: Duration,
}

/// 超声硬件驱动边界（DAC 功率 + 使能线）
pub trait SonicatorDriver: Send {
    /// 设置归一化功率（0.0 关断）
    fn set_power(&mut self, power: f64) -> Result<()>;
    /// 通/断使能线
    fn set_enabled(&mut self, enabled: bool) -> Result<()>;
}

/// 超声执行接口
pub trait Sonicator: Send {
    /// 执行一次驻留（阻塞到结束）
    fn sonicate(&mut self, spec: &SonicationSpec) -> Result<()>;
}

/// 真实计时的脉冲串执行器
///
/// 用 spin_sleep 保证通断间隔的计时精度。退出路径上总是关断
/// 使能线并把功率归零。
pub struct PulseTrainSonicator<D: SonicatorDriver> {
    driver: D,
}

impl<D: SonicatorDriver> PulseTrainSonicator<D> {
    pub fn new(driver: D) -> Self {
        PulseTrainSonicator { driver }
    }
}

impl<D: SonicatorDriver> Sonicator for PulseTrainSonicator<D> {
    fn sonicate(&mut self, spec: &SonicationSpec) -> Result<()> {
        spec.validate()?;
        info!(
            seconds = spec.seconds,
            power = spec.power,
            "sonicating"
        );
        let result = (|| -> Result<()> {
            self.driver.set_power(spec.power)?;
            for pulse in spec.pulse_train() {
                if !pulse.on.is_zero() {
                    self.driver.set_enabled(true)?;
                    spin_sleep::sleep(pulse.on);
                }
                if !pulse.off.is_zero() {
                    self.driver.set_enabled(false)?;
                    spin_sleep::sleep(pulse.off);
                }
            }
            Ok(())
        })();
        // 无论成败都回到安全态
        let _ = self.driver.set_enabled(false);
        let _ = self.driver.set_power(0.0);
        debug!("sonication finished");
        result
    }
}

/// 模拟超声执行器（记录调用，不等待）
#[derive(Default)]
pub struct SimSonicator {
    runs: Arc<Mutex<Vec<SonicationSpec>>>,
}

impl SimSonicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录句柄（测试侧持有）
    pub fn runs_handle(&self) -> Arc<Mutex<Vec<SonicationSpec>>> {
        self.runs.clone()
    }
}

impl Sonicator for SimSonicator {
    fn sonicate(&mut self, spec: &SonicationSpec) -> Result<()> {
        spec.validate()?;
        self.runs.lock().push(*spec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(seconds: f64, duty: f64, interval: f64) -> SonicationSpec {
        SonicationSpec {
            seconds,
            power: 0.5,
            pulse_duty_cycle: duty,
            pulse_interval: interval,
        }
    }

    #[test]
    fn test_validation_bounds() {
        assert!(spec(3.0, 0.5, 1.0).validate().is_ok());
        // 功率低于起振阈值
        let mut s = spec(3.0, 0.5, 1.0);
        s.power = 0.3;
        assert!(s.validate().is_err());
        // 周期超过总时间
        assert!(spec(1.0, 0.5, 2.0).validate().is_err());
        // 非正总时间
        assert!(spec(0.0, 0.5, 1.0).validate().is_err());
    }

    #[test]
    fn test_pulse_train_total_duration() {
        let train = spec(3.0, 0.5, 1.0).pulse_train();
        let total: Duration = train.iter().map(|p| p.on + p.off).sum();
        assert!((total.as_secs_f64() - 3.0).abs() < 1e-9);
        assert_eq!(train.len(), 3);
    }

    #[test]
    fn test_pulse_train_truncates_last_cycle() {
        // 2.5 秒、1 秒周期：最后半个周期只剩 0.5 秒通
        let train = spec(2.5, 0.5, 1.0).pulse_train();
        let total: Duration = train.iter().map(|p| p.on + p.off).sum();
        assert!((total.as_secs_f64() - 2.5).abs() < 1e-9);
        let last = train.last().unwrap();
        assert!((last.on.as_secs_f64() - 0.5).abs() < 1e-9);
        assert!(last.off.is_zero());
    }

    #[test]
    fn test_full_duty_cycle_is_continuous() {
        let train = spec(2.0, 1.0, 1.0).pulse_train();
        assert!(train.iter().all(|p| p.off.is_zero()));
        let on_total: Duration = train.iter().map(|p| p.on).sum();
        assert!((on_total.as_secs_f64() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_sim_sonicator_records_runs() {
        let mut sim = SimSonicator::new();
        let runs = sim.runs_handle();
        sim.sonicate(&spec(3.0, 0.5, 1.0)).unwrap();
        assert_eq!(runs.lock().len(), 1);
        assert_eq!(runs.lock()[0].seconds, 3.0);
    }
}
