//! # Guidance モジュール
//!
//! ミッション誘導の状態機械を提供します。
//!
//! エンジンは「現在のウェイポイント」を管理し、通常の逐次進行とROI受信による
//! 迂回を調停します。迂回後は中断したウェイポイントから測量を再開します。
//!
//! ## 状態遷移
//!
//! ```text
//! Initializing -> Cruising <-> Diverting -> (Cruising | Terminated)
//!                     \-> Failed
//! ```
//!
//! ## イベント源
//!
//! 1. **進行確認タイマー**: 固定周期で飛行中ゴールの結果を確認
//! 2. **ポーズ配信**: 機体位置の最新値を保持
//! 3. **ROI配信**: 不定期に迂回を要求
//!
//! 3つのイベントは単一タスク上の `tokio::select!` で直列化され、ハンドラが
//! 同時に実行されることはありません。迂回（ROIへ移動 → 待機 → 復帰 → 再開）は
//! ROIハンドラ内で最後まで実行され、その間は他のイベントを処理しません。
//! 迂回中に届いたROIは破棄されます。
//!
//! ## 終了処理
//!
//! 正常完了・失敗・オペレーター中断のいずれの経路でも、飛行中のゴールは
//! キャンセルされ、全ての受信チャネルは解放されます。

use crate::models::{
    ActuationClient, GoalHandle, GoalOutcome, MissionPlan, MotionGoal, MotionLimits, Position3D, Waypoint,
};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// 誘導エンジン設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidanceConfig {
    pub limits: MotionLimits,
    /// ROI上空での待機時間（秒）
    pub roi_dwell_s: f64,
    /// 進行確認の周期（秒）
    pub poll_period_s: f64,
    /// ゴールのタイムアウト（秒）。未設定なら無制限に待つ
    pub goal_timeout_s: Option<f64>,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            limits: MotionLimits::default(),
            roi_dwell_s: 5.0,
            poll_period_s: 0.2,
            goal_timeout_s: None,
        }
    }
}

impl GuidanceConfig {
    pub fn roi_dwell(&self) -> Duration {
        Duration::from_secs_f64(self.roi_dwell_s)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs_f64(self.poll_period_s)
    }

    pub fn goal_timeout(&self) -> Option<Duration> {
        self.goal_timeout_s.map(Duration::from_secs_f64)
    }
}

/// ゴールの送信先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalTarget {
    /// 計画上のウェイポイント（インデックス）
    Plan(usize),
    /// ROI
    Roi,
    /// 迂回開始地点への復帰
    Return,
}

impl fmt::Display for GoalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalTarget::Plan(index) => write!(f, "waypoint #{}", index),
            GoalTarget::Roi => write!(f, "ROI"),
            GoalTarget::Return => write!(f, "return point"),
        }
    }
}

/// ミッション失敗理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    GoalFailed { target: GoalTarget, outcome: GoalOutcome },
    GoalTimedOut { target: GoalTarget },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::GoalFailed { target, outcome } => {
                write!(f, "{} へのゴールが {} で終了しました", target, outcome)
            }
            FailureReason::GoalTimedOut { target } => {
                write!(f, "{} へのゴールがタイムアウトしました", target)
            }
        }
    }
}

/// 正常終了の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Complete,
    Interrupted,
}

/// 迂回の進行段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiversionPhase {
    ToRoi,
    Dwell,
    Return,
    Resume,
}

/// 迂回1回分の状態
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversionState {
    pub roi: Waypoint,
    /// 迂回開始時の機体位置（ヨー0）
    pub return_waypoint: Waypoint,
    /// 復帰後に再送する計画インデックス
    pub resume_index: usize,
    pub phase: DiversionPhase,
}

/// ミッション状態
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissionState {
    Initializing,
    Cruising,
    Diverting(DiversionState),
    Terminated(TerminationReason),
    Failed(FailureReason),
}

impl MissionState {
    /// 終端状態かどうか
    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionState::Terminated(_) | MissionState::Failed(_))
    }
}

/// オペレーターに報告するミッション結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissionOutcome {
    Complete,
    Cancelled(FailureReason),
    Interrupted,
}

impl fmt::Display for MissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionOutcome::Complete => f.write_str("complete"),
            MissionOutcome::Cancelled(_) => f.write_str("cancelled"),
            MissionOutcome::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// 飛行中のゴール
#[derive(Debug, Clone, Copy)]
struct ActiveGoal {
    handle: GoalHandle,
    target: GoalTarget,
    issued_at: Instant,
}

/// ミッション誘導エンジン
pub struct GuidanceEngine<A: ActuationClient> {
    plan: MissionPlan,
    config: GuidanceConfig,
    actuator: A,
    /// 次に送信する計画インデックス
    cursor: usize,
    active_goal: Option<ActiveGoal>,
    pose: Position3D,
    state: MissionState,
}

impl<A: ActuationClient> GuidanceEngine<A> {
    pub fn new(plan: MissionPlan, config: GuidanceConfig, actuator: A) -> Self {
        Self {
            plan,
            config,
            actuator,
            cursor: 0,
            active_goal: None,
            pose: Position3D::default(),
            state: MissionState::Initializing,
        }
    }

    pub fn state(&self) -> &MissionState {
        &self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 飛行サーバーの準備を待ち、最初のウェイポイントを送信
    pub async fn start(&mut self) {
        if !matches!(self.state, MissionState::Initializing) {
            warn!("ミッションは既に開始されています");
            return;
        }

        info!("飛行サーバーの起動を待機中...");
        self.actuator.wait_for_server().await;

        let first = self.plan.waypoints()[0];
        info!("ミッション開始: 全{}点, 最初のウェイポイント {}", self.plan.len(), first);
        self.issue(GoalTarget::Plan(0), first);
        self.cursor = 1;
        self.state = MissionState::Cruising;
    }

    /// ポーズ配信ハンドラ
    pub fn on_pose(&mut self, pose: Position3D) {
        trace!("pose: {}", pose);
        self.pose = pose;
    }

    /// 進行確認ハンドラ
    ///
    /// 巡航中のみ飛行中ゴールの結果を確認します。`Pending` の間は何もしません。
    pub fn on_progress_tick(&mut self) {
        if !matches!(self.state, MissionState::Cruising) {
            return;
        }
        let Some(goal) = self.active_goal else {
            return;
        };

        match self.actuator.poll_outcome(goal.handle) {
            GoalOutcome::Pending => {
                if let Some(limit) = self.config.goal_timeout() {
                    if goal.issued_at.elapsed() > limit {
                        self.cancel_active();
                        self.fail(FailureReason::GoalTimedOut { target: goal.target });
                    }
                }
            }
            GoalOutcome::Succeeded => {
                self.active_goal = None;
                if self.cursor < self.plan.len() {
                    let index = self.cursor;
                    let next = self.plan.waypoints()[index];
                    info!("ウェイポイント {}/{} へ移動: {}", index + 1, self.plan.len(), next);
                    self.issue(GoalTarget::Plan(index), next);
                    self.cursor += 1;
                } else {
                    info!("全ウェイポイントに到達しました");
                    self.state = MissionState::Terminated(TerminationReason::Complete);
                }
            }
            outcome => {
                self.active_goal = None;
                self.fail(FailureReason::GoalFailed {
                    target: goal.target,
                    outcome,
                });
            }
        }
    }

    /// ROI受信ハンドラ
    ///
    /// 巡航中であれば迂回を最後まで実行します。それ以外の状態では破棄します。
    pub async fn on_roi(&mut self, roi: Position3D) {
        match self.state {
            MissionState::Cruising => {}
            MissionState::Diverting(_) => {
                warn!("迂回中のためROIを破棄しました: {}", roi);
                return;
            }
            _ => {
                debug!("巡航中ではないためROIを無視しました: {}", roi);
                return;
            }
        }

        if let Err(reason) = self.divert(roi).await {
            self.cancel_active();
            self.fail(reason);
        }
    }

    async fn divert(&mut self, roi: Position3D) -> Result<(), FailureReason> {
        self.cancel_active();

        let return_waypoint = self.pose.to_waypoint();
        let resume_index = self.cursor.saturating_sub(1);
        let roi_waypoint = roi.to_waypoint();
        self.state = MissionState::Diverting(DiversionState {
            roi: roi_waypoint,
            return_waypoint,
            resume_index,
            phase: DiversionPhase::ToRoi,
        });
        info!(
            "ROIを受信、迂回を開始します: ROI {} / 復帰点 {} / 再開 waypoint #{}",
            roi_waypoint, return_waypoint, resume_index
        );

        self.visit(GoalTarget::Roi, roi_waypoint).await?;

        self.set_phase(DiversionPhase::Dwell);
        info!("ROI上空で {:.1}秒間待機します", self.config.roi_dwell_s);
        time::sleep(self.config.roi_dwell()).await;

        self.set_phase(DiversionPhase::Return);
        info!("復帰点へ戻ります: {}", return_waypoint);
        self.visit(GoalTarget::Return, return_waypoint).await?;

        self.set_phase(DiversionPhase::Resume);
        let resume = self.plan.waypoints()[resume_index];
        info!("測量を再開します: waypoint #{} {}", resume_index, resume);
        self.issue(GoalTarget::Plan(resume_index), resume);

        self.state = MissionState::Cruising;
        Ok(())
    }

    /// ゴールを送信し、終端結果まで待機
    async fn visit(&mut self, target: GoalTarget, waypoint: Waypoint) -> Result<(), FailureReason> {
        let handle = self.issue(target, waypoint);

        let outcome = match self.config.goal_timeout() {
            Some(limit) => match time::timeout(limit, self.actuator.wait_for_outcome(handle)).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(FailureReason::GoalTimedOut { target }),
            },
            None => self.actuator.wait_for_outcome(handle).await,
        };

        self.active_goal = None;
        match outcome {
            GoalOutcome::Succeeded => Ok(()),
            outcome => Err(FailureReason::GoalFailed { target, outcome }),
        }
    }

    fn issue(&mut self, target: GoalTarget, waypoint: Waypoint) -> GoalHandle {
        let handle = self.actuator.submit_goal(MotionGoal::new(waypoint, self.config.limits));
        debug!("{} を送信: {} -> {}", handle, target, waypoint);
        self.active_goal = Some(ActiveGoal {
            handle,
            target,
            issued_at: Instant::now(),
        });
        handle
    }

    fn cancel_active(&mut self) {
        if let Some(goal) = self.active_goal.take() {
            debug!("{} をキャンセル ({})", goal.handle, goal.target);
            self.actuator.cancel(goal.handle);
        }
    }

    fn set_phase(&mut self, phase: DiversionPhase) {
        if let MissionState::Diverting(diversion) = &mut self.state {
            debug!(
                "迂回フェーズ {:?} -> {:?} (ROI {}, 復帰点 {}, 再開 waypoint #{})",
                diversion.phase, phase, diversion.roi, diversion.return_waypoint, diversion.resume_index
            );
            diversion.phase = phase;
        }
    }

    fn fail(&mut self, reason: FailureReason) {
        error!("ミッションを中止します: {}", reason);
        self.state = MissionState::Failed(reason);
    }

    /// 飛行中のゴールをキャンセル
    ///
    /// 何度呼んでも安全です。`Drop` からも呼ばれます。
    pub fn shutdown(&mut self) {
        self.cancel_active();
    }

    /// イベントループを実行
    ///
    /// 終端状態に達するか、`shutdown` が `true` になるまで戻りません。
    pub async fn run(
        mut self,
        mut telemetry: watch::Receiver<Position3D>,
        mut roi_events: mpsc::Receiver<Position3D>,
        mut shutdown: watch::Receiver<bool>,
    ) -> MissionOutcome {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => {
                warn!("起動待機中に中断されました");
                self.state = MissionState::Terminated(TerminationReason::Interrupted);
            }
            _ = self.start() => {}
        }

        let mut ticker = time::interval(self.config.poll_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut telemetry_open = true;
        let mut roi_open = true;

        while !self.state.is_terminal() {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    warn!("オペレーターによる中断を受信しました");
                    self.state = MissionState::Terminated(TerminationReason::Interrupted);
                }
                _ = ticker.tick() => {
                    self.on_progress_tick();
                }
                event = roi_events.recv(), if roi_open => {
                    match event {
                        Some(roi) => {
                            let pose = *telemetry.borrow_and_update();
                            self.on_pose(pose);
                            tokio::select! {
                                biased;
                                _ = shutdown_requested(&mut shutdown) => {
                                    warn!("迂回中にオペレーターによる中断を受信しました");
                                    self.state = MissionState::Terminated(TerminationReason::Interrupted);
                                }
                                _ = self.on_roi(roi) => {}
                            }
                            while let Ok(dropped) = roi_events.try_recv() {
                                warn!("迂回中に受信したROIを破棄しました: {}", dropped);
                            }
                        }
                        None => {
                            debug!("ROI配信が終了しました");
                            roi_open = false;
                        }
                    }
                }
                changed = telemetry.changed(), if telemetry_open => {
                    match changed {
                        Ok(()) => {
                            let pose = *telemetry.borrow_and_update();
                            self.on_pose(pose);
                        }
                        Err(_) => {
                            warn!("ポーズ配信が終了しました。最後の位置を保持します");
                            telemetry_open = false;
                        }
                    }
                }
            }
        }

        self.shutdown();

        let outcome = match self.state {
            MissionState::Terminated(TerminationReason::Complete) => MissionOutcome::Complete,
            MissionState::Failed(reason) => MissionOutcome::Cancelled(reason),
            _ => MissionOutcome::Interrupted,
        };
        info!("ミッション終了: {}", outcome);
        outcome
    }
}

impl<A: ActuationClient> Drop for GuidanceEngine<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 中断フラグが立つまで待機
///
/// 送信側が破棄された場合は永久に待機します。
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
