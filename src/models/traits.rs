use crate::models::common::Waypoint;
use crate::models::goal::{GoalHandle, GoalOutcome, MotionGoal};
use std::fmt;

/// 飛行サーバー（移動指令の実行系）のインターフェース
///
/// 指令の実行そのものは外部に委譲され、結果は非同期に報告されます。
pub trait ActuationClient {
    /// サーバーが利用可能になるまで待機
    async fn wait_for_server(&mut self);

    /// ゴールを送信
    fn submit_goal(&mut self, goal: MotionGoal) -> GoalHandle;

    /// ゴールをキャンセル（結果は待たない）
    fn cancel(&mut self, handle: GoalHandle);

    /// 現在の結果を取得（副作用なし）
    fn poll_outcome(&self, handle: GoalHandle) -> GoalOutcome;

    /// 終端結果が出るまで待機
    async fn wait_for_outcome(&mut self, handle: GoalHandle) -> GoalOutcome;
}

/// 経路計画サービスの応答
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedPath {
    /// 最適化済みの疎な経路
    pub sparse: Vec<Waypoint>,
    /// 全経路
    pub full: Vec<Waypoint>,
}

/// 経路計画サービスのインターフェース
pub trait RoutingClient {
    /// サービスが利用可能になるまで待機
    async fn wait_for_service(&mut self);

    /// `start` から `end` までの経路を `hint` 経由で要求
    async fn request_path(
        &mut self,
        start: Waypoint,
        end: Waypoint,
        hint: Waypoint,
    ) -> Result<PlannedPath, RoutingError>;
}

/// 経路計画サービス呼び出しエラー
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingError {
    Failed(String),
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::Failed(msg) => write!(f, "経路計画に失敗しました: {}", msg),
        }
    }
}

impl std::error::Error for RoutingError {}
