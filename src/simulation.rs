//! # Simulation モジュール
//!
//! 外部協調サービス（飛行サーバー、ポーズ配信、ROI配信、経路計画）を
//! プロセス内で模擬します。
//!
//! 機体は固定時間刻み（Δt）で更新される質点として扱い、ゴールの並進速度と
//! ヨーレートで目標へ向かいます。位置とヨーが許容誤差内に入った時点で
//! ゴールは成功となります。新しいゴールは実行中のゴールを中断（preempt）します。

use crate::config::RoiEventConfig;
use crate::models::common::math_utils;
use crate::models::{
    ActuationClient, GoalHandle, GoalOutcome, MotionGoal, PlannedPath, Position3D, RoutingClient, RoutingError,
    Waypoint,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// 模擬機体
#[derive(Debug)]
pub struct SimVehicle {
    pub position: Position3D,
    pub yaw: f64,
    pub step_count: u64,
    active: Option<(GoalHandle, MotionGoal)>,
    outcomes: HashMap<GoalHandle, GoalOutcome>,
    next_id: u64,
}

impl SimVehicle {
    pub fn new(start: Position3D) -> Self {
        Self {
            position: start,
            yaw: 0.0,
            step_count: 0,
            active: None,
            outcomes: HashMap::new(),
            next_id: 1,
        }
    }

    /// ゴールを受け付ける
    ///
    /// 速度や精度が正でないゴールは拒否されます。
    pub fn submit(&mut self, goal: MotionGoal) -> GoalHandle {
        let handle = GoalHandle(self.next_id);
        self.next_id += 1;

        if let Some((previous, _)) = self.active.take() {
            debug!("{} は {} により中断されました", previous, handle);
            self.outcomes.insert(previous, GoalOutcome::Preempted);
        }

        let l = &goal.limits;
        let acceptable = goal.target.is_finite()
            && l.linear_velocity > 0.0
            && l.yaw_velocity > 0.0
            && l.position_accuracy > 0.0
            && l.yaw_accuracy > 0.0;
        if !acceptable {
            warn!("{} を拒否しました: {:?}", handle, goal);
            self.outcomes.insert(handle, GoalOutcome::Rejected);
            return handle;
        }

        self.active = Some((handle, goal));
        self.outcomes.insert(handle, GoalOutcome::Pending);
        handle
    }

    pub fn cancel(&mut self, handle: GoalHandle) {
        if matches!(self.active, Some((active, _)) if active == handle) {
            self.active = None;
            self.outcomes.insert(handle, GoalOutcome::Preempted);
        }
    }

    pub fn outcome(&self, handle: GoalHandle) -> GoalOutcome {
        self.outcomes.get(&handle).copied().unwrap_or(GoalOutcome::Rejected)
    }

    /// 1ティックの運動更新
    pub fn tick(&mut self, dt: f64) {
        self.step_count += 1;
        let Some((handle, goal)) = self.active else {
            return;
        };

        let target = goal.target.position();
        let offset = target - self.position;
        let distance = offset.magnitude();
        let step = goal.limits.linear_velocity * dt;
        self.position = if distance <= step {
            target
        } else {
            self.position + offset * (step / distance)
        };

        let yaw_error = math_utils::angle_difference(self.yaw, goal.target.yaw);
        let yaw_step = goal.limits.yaw_velocity * dt;
        self.yaw = if yaw_error.abs() <= yaw_step {
            goal.target.yaw
        } else {
            math_utils::normalize_angle(self.yaw + yaw_step * yaw_error.signum())
        };

        let converged = self.position.distance_3d(&target) <= goal.limits.position_accuracy
            && math_utils::angle_difference(self.yaw, goal.target.yaw).abs() <= goal.limits.yaw_accuracy;
        if converged {
            debug!("{} に到達しました: {}", handle, goal.target);
            self.outcomes.insert(handle, GoalOutcome::Succeeded);
            self.active = None;
        }
    }
}

fn lock(vehicle: &Mutex<SimVehicle>) -> MutexGuard<'_, SimVehicle> {
    vehicle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 模擬飛行サーバー
#[derive(Debug, Clone)]
pub struct SimFlightServer {
    vehicle: Arc<Mutex<SimVehicle>>,
    name: String,
    startup_delay: Duration,
    poll_period: Duration,
}

impl SimFlightServer {
    pub fn new(vehicle: Arc<Mutex<SimVehicle>>, name: String, startup_delay: Duration) -> Self {
        Self {
            vehicle,
            name,
            startup_delay,
            poll_period: Duration::from_millis(20),
        }
    }
}

impl ActuationClient for SimFlightServer {
    async fn wait_for_server(&mut self) {
        info!("飛行サーバー '{}' に接続中...", self.name);
        time::sleep(self.startup_delay).await;
        info!("飛行サーバー '{}' に接続しました", self.name);
    }

    fn submit_goal(&mut self, goal: MotionGoal) -> GoalHandle {
        lock(&self.vehicle).submit(goal)
    }

    fn cancel(&mut self, handle: GoalHandle) {
        lock(&self.vehicle).cancel(handle);
    }

    fn poll_outcome(&self, handle: GoalHandle) -> GoalOutcome {
        lock(&self.vehicle).outcome(handle)
    }

    async fn wait_for_outcome(&mut self, handle: GoalHandle) -> GoalOutcome {
        let mut ticker = time::interval(self.poll_period);
        loop {
            ticker.tick().await;
            let outcome = self.poll_outcome(handle);
            if outcome.is_terminal() {
                return outcome;
            }
        }
    }
}

/// 機体モデルを固定周期で更新し、ポーズを配信するタスクを起動
///
/// ポーズの受信側が全て破棄されると終了します。
pub fn spawn_vehicle_loop(
    vehicle: Arc<Mutex<SimVehicle>>,
    dt_s: f64,
    pose_tx: watch::Sender<Position3D>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs_f64(dt_s));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let (position, steps) = {
                let mut v = lock(&vehicle);
                v.tick(dt_s);
                (v.position, v.step_count)
            };
            if steps % 100 == 0 {
                trace!("機体位置: {} (ステップ: {})", position, steps);
            }
            if pose_tx.send(position).is_err() {
                debug!("ポーズ配信を終了します");
                break;
            }
        }
    })
}

/// 予定されたROIイベントを送信するタスクを起動
pub fn spawn_roi_script(mut events: Vec<RoiEventConfig>, roi_tx: mpsc::Sender<Position3D>) -> JoinHandle<()> {
    events.sort_by(|a, b| a.at_s.total_cmp(&b.at_s));
    tokio::spawn(async move {
        let origin = Instant::now();
        for event in events {
            time::sleep_until(origin + Duration::from_secs_f64(event.at_s)).await;
            let roi = Position3D::new(event.x, event.y, event.z);
            info!("ROIイベント送信 ({:.1}秒): {}", event.at_s, roi);
            if roi_tx.send(roi).await.is_err() {
                break;
            }
        }
    })
}

/// 模擬経路計画サービス
///
/// ヒント経由の直線経路を返します。全経路は `step_m` 間隔でサンプリングし、
/// 疎な経路は始点・ヒント・終点のみとします。
#[derive(Debug, Clone)]
pub struct SimPlanner {
    service: String,
    step_m: f64,
    startup_delay: Duration,
}

impl SimPlanner {
    pub fn new(service: String, step_m: f64, startup_delay: Duration) -> Self {
        Self {
            service,
            step_m,
            startup_delay,
        }
    }

    fn sample(&self, from: Waypoint, to: Waypoint, out: &mut Vec<Waypoint>) {
        let offset = to.position() - from.position();
        let count = (offset.magnitude() / self.step_m).ceil().max(1.0) as usize;
        for i in 1..=count {
            let p = from.position() + offset * (i as f64 / count as f64);
            out.push(p.to_waypoint());
        }
    }
}

impl RoutingClient for SimPlanner {
    async fn wait_for_service(&mut self) {
        info!("経路計画サービス '{}' を待機中...", self.service);
        time::sleep(self.startup_delay).await;
    }

    async fn request_path(
        &mut self,
        start: Waypoint,
        end: Waypoint,
        hint: Waypoint,
    ) -> Result<PlannedPath, RoutingError> {
        if !(self.step_m > 0.0) {
            return Err(RoutingError::Failed(format!("invalid step {}", self.step_m)));
        }

        let mut full = vec![start];
        self.sample(start, hint, &mut full);
        if hint != end {
            self.sample(hint, end, &mut full);
        }

        let sparse = if hint == end {
            vec![start, end]
        } else {
            vec![start, hint, end]
        };

        Ok(PlannedPath { sparse, full })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MotionLimits;

    fn goal(x: f64, y: f64, z: f64) -> MotionGoal {
        MotionGoal::new(Waypoint::new(x, y, z, 0.0), MotionLimits::default())
    }

    #[test]
    fn test_vehicle_reaches_goal() {
        let mut vehicle = SimVehicle::new(Position3D::default());
        let handle = vehicle.submit(goal(1.2, 0.0, 0.0));
        assert_eq!(vehicle.outcome(handle), GoalOutcome::Pending);

        // 0.6m/s * 0.1s = 0.06m/tick
        for _ in 0..18 {
            vehicle.tick(0.1);
        }
        assert_eq!(vehicle.outcome(handle), GoalOutcome::Pending);
        for _ in 0..3 {
            vehicle.tick(0.1);
        }
        assert_eq!(vehicle.outcome(handle), GoalOutcome::Succeeded);
        assert!(vehicle.position.distance_3d(&Position3D::new(1.2, 0.0, 0.0)) <= 0.1);
    }

    #[test]
    fn test_new_goal_preempts_and_cancel() {
        let mut vehicle = SimVehicle::new(Position3D::default());
        let first = vehicle.submit(goal(5.0, 0.0, 0.0));
        let second = vehicle.submit(goal(0.0, 5.0, 0.0));
        assert_eq!(vehicle.outcome(first), GoalOutcome::Preempted);
        assert_eq!(vehicle.outcome(second), GoalOutcome::Pending);

        vehicle.cancel(first);
        assert_eq!(vehicle.outcome(second), GoalOutcome::Pending);
        vehicle.cancel(second);
        assert_eq!(vehicle.outcome(second), GoalOutcome::Preempted);
        assert_eq!(vehicle.outcome(GoalHandle(99)), GoalOutcome::Rejected);
    }

    #[test]
    fn test_invalid_goal_rejected() {
        let mut vehicle = SimVehicle::new(Position3D::default());
        let limits = MotionLimits {
            linear_velocity: 0.0,
            ..MotionLimits::default()
        };
        let handle = vehicle.submit(MotionGoal::new(Waypoint::new(1.0, 0.0, 0.0, 0.0), limits));
        assert_eq!(vehicle.outcome(handle), GoalOutcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_wait_resolves_with_vehicle_loop() {
        let vehicle = Arc::new(Mutex::new(SimVehicle::new(Position3D::default())));
        let (pose_tx, mut pose_rx) = watch::channel(Position3D::default());
        let driver = spawn_vehicle_loop(vehicle.clone(), 0.05, pose_tx);
        let mut server = SimFlightServer::new(vehicle, "sim".to_string(), Duration::from_millis(10));

        server.wait_for_server().await;
        let handle = server.submit_goal(goal(0.0, 1.0, 1.0));
        let outcome = server.wait_for_outcome(handle).await;

        assert_eq!(outcome, GoalOutcome::Succeeded);
        let pose = *pose_rx.borrow_and_update();
        assert!(pose.distance_3d(&Position3D::new(0.0, 1.0, 1.0)) <= 0.1);
        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_roi_script_sends_in_time_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let events = vec![
            RoiEventConfig { at_s: 2.0, x: 2.0, y: 0.0, z: 1.0 },
            RoiEventConfig { at_s: 1.0, x: 1.0, y: 0.0, z: 1.0 },
        ];
        spawn_roi_script(events, tx);

        assert_eq!(rx.recv().await, Some(Position3D::new(1.0, 0.0, 1.0)));
        assert_eq!(rx.recv().await, Some(Position3D::new(2.0, 0.0, 1.0)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_planner_paths_pass_through_hint() {
        let mut planner = SimPlanner::new("planner".to_string(), 0.5, Duration::ZERO);
        let start = Waypoint::new(0.0, 0.0, 1.0, 0.0);
        let hint = Waypoint::new(1.0, 0.0, 1.0, 0.0);
        let end = Waypoint::new(1.0, 1.0, 1.0, 0.0);

        let path = planner.request_path(start, end, hint).await.unwrap();

        assert_eq!(path.sparse, vec![start, hint, end]);
        assert_eq!(path.full.len(), 5);
        assert_eq!(path.full[0], start);
        assert_eq!(path.full[2], hint);
        assert_eq!(*path.full.last().unwrap(), end);
    }
}
