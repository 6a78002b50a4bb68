use crate::models::common::Waypoint;
use std::fmt;

/// 速度・収束精度の設定
///
/// 起動時に一度だけ読み込まれ、以降は変更されません。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    /// 並進速度（m/s）
    pub linear_velocity: f64,
    /// ヨーレート（rad/s）
    pub yaw_velocity: f64,
    /// 位置の収束許容誤差（m）
    pub position_accuracy: f64,
    /// ヨーの収束許容誤差（rad）
    pub yaw_accuracy: f64,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            linear_velocity: 0.6,
            yaw_velocity: 0.2,
            position_accuracy: 0.1,
            yaw_accuracy: 0.1,
        }
    }
}

/// 飛行サーバーに渡す移動指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionGoal {
    pub target: Waypoint,
    pub limits: MotionLimits,
}

impl MotionGoal {
    pub fn new(target: Waypoint, limits: MotionLimits) -> Self {
        Self { target, limits }
    }
}

/// 飛行サーバーが払い出すゴール識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GoalHandle(pub u64);

impl fmt::Display for GoalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "goal#{}", self.0)
    }
}

/// ゴールの非同期結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalOutcome {
    /// 実行中
    Pending,
    /// 到達
    Succeeded,
    /// 別ゴールまたはキャンセルにより中断
    Preempted,
    /// 実行中に失敗
    Aborted,
    /// 受理されなかった
    Rejected,
}

impl GoalOutcome {
    /// 終端状態かどうか
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GoalOutcome::Pending)
    }
}

impl fmt::Display for GoalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GoalOutcome::Pending => "pending",
            GoalOutcome::Succeeded => "succeeded",
            GoalOutcome::Preempted => "preempted",
            GoalOutcome::Aborted => "aborted",
            GoalOutcome::Rejected => "rejected",
        };
        f.write_str(s)
    }
}
