//! 机器位姿类型

use serde::{Deserialize, Serialize};

/// 机器位姿（X, Y, Z 为 mm，U 为锁轴角度）
///
/// 只允许从已确认的传输应答构造/更新，绝不推测。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// 换刀锁轴角度
    pub u: f64,
}

impl From<[f64; 4]> for Pose {
    fn from(axes: [f64; 4]) -> Self {
        Pose {
            x: axes[0],
            y: axes[1],
            z: axes[2],
            u: axes[3],
        }
    }
}

impl From<Pose> for [f64; 4] {
    fn from(pose: Pose) -> Self {
        [pose.x, pose.y, pose.z, pose.u]
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "X{:.3} Y{:.3} Z{:.3} U{:.3}",
            self.x, self.y, self.z, self.u
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_round_trip() {
        let pose = Pose::from([287.75, 289.75, 10.0, 45.0]);
        assert_eq!(pose.z, 10.0);
        let axes: [f64; 4] = pose.into();
        assert_eq!(axes, [287.75, 289.75, 10.0, 45.0]);
    }

    #[test]
    fn test_pose_display() {
        let pose = Pose::from([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(pose.to_string(), "X1.000 Y2.000 Z3.000 U4.000");
    }
}
