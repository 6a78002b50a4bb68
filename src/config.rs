use crate::grid::{GridSpec, MAX_GRID_POINTS};
use crate::guidance::GuidanceConfig;
use crate::models::{MissionPlan, MotionLimits, Position3D};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 秒数で指定する設定値の上限（約31年）
pub const MAX_SECONDS: f64 = 1.0e9;

/// ミッションメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MissionMeta {
    pub name: String,
    pub description: String,
}

impl Default for MissionMeta {
    fn default() -> Self {
        Self {
            name: "default survey".to_string(),
            description: "5m x 8m grid survey with ROI diversion".to_string(),
        }
    }
}

/// 測量グリッド設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GridConfig {
    pub width: f64,
    pub height: f64,
    pub spacing: f64,
    pub edge_offset: f64,
    pub takeoff_altitude: f64,
    pub survey_altitude: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        let spec = GridSpec::default();
        Self {
            width: spec.width,
            height: spec.height,
            spacing: spec.spacing,
            edge_offset: spec.edge_offset,
            takeoff_altitude: spec.takeoff_altitude,
            survey_altitude: spec.survey_altitude,
        }
    }
}

impl GridConfig {
    pub fn to_spec(&self) -> GridSpec {
        GridSpec {
            width: self.width,
            height: self.height,
            spacing: self.spacing,
            edge_offset: self.edge_offset,
            takeoff_altitude: self.takeoff_altitude,
            survey_altitude: self.survey_altitude,
        }
    }
}

/// 経路計画サービス設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// 高密度化を行うかどうか
    pub enabled: bool,
    /// 全経路のサンプリング間隔（m）
    pub step_m: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_m: 0.5,
        }
    }
}

/// 誘導パラメータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuidanceParams {
    pub linear_velocity: f64,
    pub yaw_velocity: f64,
    pub position_accuracy: f64,
    pub yaw_accuracy: f64,
    pub roi_dwell_s: f64,
    pub poll_period_s: f64,
    pub goal_timeout_s: Option<f64>,
}

impl Default for GuidanceParams {
    fn default() -> Self {
        let config = GuidanceConfig::default();
        Self {
            linear_velocity: config.limits.linear_velocity,
            yaw_velocity: config.limits.yaw_velocity,
            position_accuracy: config.limits.position_accuracy,
            yaw_accuracy: config.limits.yaw_accuracy,
            roi_dwell_s: config.roi_dwell_s,
            poll_period_s: config.poll_period_s,
            goal_timeout_s: config.goal_timeout_s,
        }
    }
}

impl GuidanceParams {
    pub fn to_config(&self) -> GuidanceConfig {
        GuidanceConfig {
            limits: MotionLimits {
                linear_velocity: self.linear_velocity,
                yaw_velocity: self.yaw_velocity,
                position_accuracy: self.position_accuracy,
                yaw_accuracy: self.yaw_accuracy,
            },
            roi_dwell_s: self.roi_dwell_s,
            poll_period_s: self.poll_period_s,
            goal_timeout_s: self.goal_timeout_s,
        }
    }
}

/// 外部サービスのトピック・サービス名
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub flight_server: String,
    pub pose_topic: String,
    pub roi_topic: String,
    pub planner_service: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            flight_server: "spar/flight".to_string(),
            pose_topic: "uavasr/pose".to_string(),
            roi_topic: "target_roi".to_string(),
            planner_service: "path_planner/request".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PositionConfig {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PositionConfig {
    pub fn to_position(&self) -> Position3D {
        Position3D::new(self.x, self.y, self.z)
    }
}

/// 予定されたROIイベント
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RoiEventConfig {
    /// ミッション開始からの時刻（秒）
    pub at_s: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 機体シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimConfig {
    /// 機体モデルの時間刻み（秒）
    pub dt_s: f64,
    /// 初期位置
    pub start: PositionConfig,
    /// サービス起動までの遅延（秒）
    pub startup_delay_s: f64,
    pub roi_events: Vec<RoiEventConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt_s: 0.05,
            start: PositionConfig { x: 0.0, y: 0.0, z: 0.0 },
            startup_delay_s: 0.5,
            roi_events: Vec::new(),
        }
    }
}

/// 完全なミッション設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MissionConfig {
    pub meta: MissionMeta,
    pub grid: GridConfig,
    /// 明示的な計画。指定された場合はグリッドの代わりに使用
    pub plan: Option<Vec<Vec<f64>>>,
    pub planner: PlannerConfig,
    pub guidance: GuidanceParams,
    pub endpoints: EndpointConfig,
    pub sim: SimConfig,
}

impl MissionConfig {
    /// YAMLファイルからミッション設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;

        let config: MissionConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.guidance;
        let positive = [
            ("linear_velocity", g.linear_velocity),
            ("yaw_velocity", g.yaw_velocity),
            ("position_accuracy", g.position_accuracy),
            ("yaw_accuracy", g.yaw_accuracy),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::ValidationError(format!("{} must be positive", name)));
            }
        }

        check_seconds("poll_period_s", g.poll_period_s, false)?;
        check_seconds("sim.dt_s", self.sim.dt_s, false)?;
        check_seconds("roi_dwell_s", g.roi_dwell_s, true)?;
        if let Some(timeout) = g.goal_timeout_s {
            check_seconds("goal_timeout_s", timeout, false)?;
        }
        check_seconds("sim.startup_delay_s", self.sim.startup_delay_s, true)?;
        for event in &self.sim.roi_events {
            check_seconds("sim.roi_events.at_s", event.at_s, true)?;
        }

        if self.planner.enabled && !(self.planner.step_m > 0.0 && self.planner.step_m.is_finite()) {
            return Err(ConfigError::ValidationError("planner.step_m must be positive".to_string()));
        }

        match &self.plan {
            Some(rows) => {
                MissionPlan::from_rows(rows).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            }
            None => {
                if self.grid.to_spec().interior_len().is_none() {
                    return Err(ConfigError::ValidationError(format!(
                        "grid produces more than {} survey points",
                        MAX_GRID_POINTS
                    )));
                }
            }
        }

        Ok(())
    }

    /// ミッションの概要を表示
    pub fn print_summary(&self) {
        println!("=== ミッション情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!();

        match &self.plan {
            Some(rows) => {
                println!("=== 計画 ===");
                println!("明示的な計画: {}点", rows.len());
            }
            None => {
                println!("=== 測量グリッド ===");
                println!("領域: {:.1}m x {:.1}m", self.grid.width, self.grid.height);
                println!("間隔: {:.2}m / 端オフセット: {:.2}m", self.grid.spacing, self.grid.edge_offset);
                println!(
                    "高度: 測量 {:.2}m / 離着陸 {:.2}m",
                    self.grid.survey_altitude, self.grid.takeoff_altitude
                );
            }
        }
        println!(
            "経路高密度化: {}",
            if self.planner.enabled { "有効" } else { "無効" }
        );
        println!();

        println!("=== 誘導パラメータ ===");
        println!("速度: {:.2}m/s / ヨーレート: {:.2}rad/s", self.guidance.linear_velocity, self.guidance.yaw_velocity);
        println!(
            "精度: 位置 {:.2}m / ヨー {:.2}rad",
            self.guidance.position_accuracy, self.guidance.yaw_accuracy
        );
        println!("ROI待機: {:.1}秒", self.guidance.roi_dwell_s);
        println!("進行確認周期: {:.2}秒", self.guidance.poll_period_s);
        match self.guidance.goal_timeout_s {
            Some(t) => println!("ゴールタイムアウト: {:.1}秒", t),
            None => println!("ゴールタイムアウト: なし"),
        }
        println!();

        println!("=== シミュレーション ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("予定ROI: {}件", self.sim.roi_events.len());
        for event in &self.sim.roi_events {
            println!("  {:.1}秒: ({:.2}, {:.2}, {:.2})", event.at_s, event.x, event.y, event.z);
        }
    }
}

/// 秒数の設定値を検証
///
/// 有限かつ `MAX_SECONDS` 以下であることを要求します。`allow_zero` が偽なら0も拒否します。
fn check_seconds(name: &str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let in_range = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !in_range || value > MAX_SECONDS || Duration::try_from_secs_f64(value).is_err() {
        let sign = if allow_zero { "non-negative" } else { "positive" };
        return Err(ConfigError::ValidationError(format!(
            "{} must be {} and at most {}s (got {})",
            name, sign, MAX_SECONDS, value
        )));
    }
    Ok(())
}

/// 設定読み込みエラー
#[derive(Debug)]
pub enum ConfigError {
    FileNotFound(std::path::PathBuf),
    IoError(std::path::PathBuf, std::io::Error),
    ParseError(std::path::PathBuf, serde_yaml::Error),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => {
                write!(f, "設定ファイルが見つかりません: {}", path.display())
            }
            ConfigError::IoError(path, err) => {
                write!(f, "ファイル読み込みエラー {}: {}", path.display(), err)
            }
            ConfigError::ParseError(path, err) => {
                write!(f, "YAML解析エラー {}: {}", path.display(), err)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "設定検証エラー: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MissionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.guidance.to_config(), GuidanceConfig::default());
        assert_eq!(config.grid.to_spec(), GridSpec::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
guidance:
  linear_velocity: 1.5
  roi_dwell_s: 2.0
sim:
  roi_events:
    - { at_s: 10.0, x: 1.0, y: 2.0, z: 1.5 }
"#;
        let config: MissionConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.guidance.linear_velocity, 1.5);
        assert_eq!(config.guidance.yaw_velocity, 0.2);
        assert_eq!(config.guidance.goal_timeout_s, None);
        assert_eq!(config.sim.roi_events.len(), 1);
        assert_eq!(config.endpoints.pose_topic, "uavasr/pose");
        assert!(config.plan.is_none());
    }

    #[test]
    fn test_malformed_plan_row_rejected() {
        let yaml = r#"
plan:
  - [0.0, 0.0, 1.0, 0.0]
  - [1.0, 0.0, 1.0]
"#;
        let config: MissionConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_wrongly_typed_plan_fails_to_parse() {
        let yaml = r#"
plan:
  - [0.0, "north", 1.0, 0.0]
"#;
        assert!(serde_yaml::from_str::<MissionConfig>(yaml).is_err());
    }

    #[test]
    fn test_invalid_guidance_rejected() {
        let mut config = MissionConfig::default();
        config.guidance.linear_velocity = 0.0;
        assert!(config.validate().is_err());

        let mut config = MissionConfig::default();
        config.guidance.roi_dwell_s = -1.0;
        assert!(config.validate().is_err());

        let mut config = MissionConfig::default();
        config.guidance.goal_timeout_s = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unrepresentable_seconds_rejected() {
        for yaml in [
            "sim:\n  startup_delay_s: .nan\n",
            "sim:\n  dt_s: .inf\n",
            "guidance:\n  roi_dwell_s: 1.0e20\n",
            "guidance:\n  goal_timeout_s: 1.0e20\n",
            "sim:\n  roi_events:\n    - { at_s: .nan, x: 1.0, y: 2.0, z: 1.5 }\n",
        ] {
            let config: MissionConfig = serde_yaml::from_str(yaml).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationError(_))),
                "accepted: {}",
                yaml
            );
        }
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let yaml = r#"
grid:
  width: 1.0e6
  height: 1.0e6
  spacing: 1.0e-9
"#;
        let config: MissionConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        // 明示的な計画があればグリッドは使われない
        let mut config = config;
        config.plan = Some(vec![vec![0.0, 0.0, 1.0, 0.0]]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let result = MissionConfig::from_file("does/not/exist.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
