use crate::models::common::Waypoint;
use std::fmt;

/// ミッション計画
///
/// 1点以上のウェイポイント列。構築後は変更されません。
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    waypoints: Vec<Waypoint>,
}

impl MissionPlan {
    /// ウェイポイント列から計画を作成
    pub fn new(waypoints: Vec<Waypoint>) -> Result<Self, PlanError> {
        if waypoints.is_empty() {
            return Err(PlanError::Empty);
        }
        if let Some(index) = waypoints.iter().position(|wp| !wp.is_finite()) {
            return Err(PlanError::MalformedWaypoint {
                index,
                reason: "non-finite value".to_string(),
            });
        }
        Ok(Self { waypoints })
    }

    /// `[x, y, z, yaw]` 行の列から計画を作成
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, PlanError> {
        let waypoints = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                Waypoint::from_row(row).map_err(|reason| PlanError::MalformedWaypoint { index, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(waypoints)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }
}

/// 計画構築エラー
#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    Empty,
    MalformedWaypoint { index: usize, reason: String },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::Empty => write!(f, "ミッション計画が空です"),
            PlanError::MalformedWaypoint { index, reason } => {
                write!(f, "不正なウェイポイント (index {}): {}", index, reason)
            }
        }
    }
}

impl std::error::Error for PlanError {}
