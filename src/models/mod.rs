// 基本的なデータ型と数学ユーティリティ
pub mod common;

// 移動指令とその結果
pub mod goal;

// ミッション計画
pub mod plan;

// 外部協調サービスのインターフェース（trait）定義
pub mod traits;

// 便利な re-export
pub use common::*;
pub use goal::{GoalHandle, GoalOutcome, MotionGoal, MotionLimits};
pub use plan::MissionPlan;
pub use traits::*;
