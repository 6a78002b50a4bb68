//! # Grid モジュール
//!
//! 矩形領域を往復（ボストロフェドン）走査する測量グリッドを生成します。
//!
//! 領域は原点中心で、各辺から `edge_offset` だけ内側の範囲を `spacing`
//! 間隔でサンプリングします。x方向の列ごとにy方向の走査向きを反転させ、
//! 無駄な戻り飛行を避けます。先頭と末尾には離着陸点 `(0, 0, Z_takeoff, 0)`
//! が付加されます。

use crate::models::Waypoint;
use tracing::{debug, warn};

/// 浮動小数点誤差で境界上の点が落ちないための許容量
const BOUND_EPSILON: f64 = 1e-9;

/// 1グリッドあたりの内部点数の上限
pub const MAX_GRID_POINTS: usize = 100_000;

/// グリッド生成パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    /// x方向の領域幅（m）
    pub width: f64,
    /// y方向の領域長（m）
    pub height: f64,
    /// サンプリング間隔（m）
    pub spacing: f64,
    /// 領域端からのオフセット（m）
    pub edge_offset: f64,
    /// 離着陸点の高度（m）
    pub takeoff_altitude: f64,
    /// 測量高度（m）
    pub survey_altitude: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            width: 5.0,
            height: 8.0,
            spacing: 2.0,
            edge_offset: 0.5,
            takeoff_altitude: 1.25,
            survey_altitude: 1.25,
        }
    }
}

impl GridSpec {
    /// 内部点を生成できない形状かどうか
    pub fn is_degenerate(&self) -> bool {
        let values = [self.width, self.height, self.spacing, self.edge_offset];
        values.iter().any(|v| !v.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
            || self.spacing <= 0.0
            || self.edge_offset < 0.0
            || self.edge_offset >= self.width.min(self.height) / 2.0
    }

    /// 内部点数
    ///
    /// 退化形状なら `Some(0)`、`MAX_GRID_POINTS` を超える場合は `None`。
    pub fn interior_len(&self) -> Option<usize> {
        if self.is_degenerate() {
            return Some(0);
        }
        let columns = axis_count(self.width / 2.0 - self.edge_offset, self.spacing)?;
        let rows = axis_count(self.height / 2.0 - self.edge_offset, self.spacing)?;
        columns.checked_mul(rows).filter(|n| *n <= MAX_GRID_POINTS)
    }

    /// 離着陸点
    pub fn takeoff_point(&self) -> Waypoint {
        Waypoint::new(0.0, 0.0, self.takeoff_altitude, 0.0)
    }
}

/// 測量グリッドを生成
///
/// 形状が退化している場合は警告を出し、内部点なし（離着陸点のみ）を返します。
pub fn generate_grid(spec: &GridSpec) -> Vec<Waypoint> {
    let takeoff = spec.takeoff_point();

    let capacity = match spec.interior_len() {
        Some(0) => {
            warn!(
                "グリッド形状が不正なため内部点を生成しません (width={}, height={}, spacing={}, edge_offset={})",
                spec.width, spec.height, spec.spacing, spec.edge_offset
            );
            return vec![takeoff, takeoff];
        }
        Some(n) => n + 2,
        None => {
            warn!(
                "グリッド点数が上限 {} を超えるため内部点を生成しません (width={}, height={}, spacing={})",
                MAX_GRID_POINTS, spec.width, spec.height, spec.spacing
            );
            return vec![takeoff, takeoff];
        }
    };

    let x_points = axis_samples(spec.width / 2.0 - spec.edge_offset, spec.spacing);
    let mut y_points = axis_samples(spec.height / 2.0 - spec.edge_offset, spec.spacing);

    let mut waypoints = Vec::with_capacity(capacity);
    waypoints.push(takeoff);

    for x in &x_points {
        for y in &y_points {
            waypoints.push(Waypoint::new(*x, *y, spec.survey_altitude, 0.0));
        }
        y_points.reverse();
    }

    waypoints.push(takeoff);

    debug!(
        "グリッド生成: {}列 x {}行, 合計{}点",
        x_points.len(),
        y_points.len(),
        waypoints.len()
    );

    waypoints
}

/// `[-bound, bound]` のサンプル数。上限を超える場合は `None`
fn axis_count(bound: f64, spacing: f64) -> Option<usize> {
    let count = ((2.0 * bound + BOUND_EPSILON) / spacing).floor() + 1.0;
    (count.is_finite() && count <= MAX_GRID_POINTS as f64).then_some(count as usize)
}

/// `[-bound, bound]` を `-bound` から `spacing` 刻みでサンプリング
fn axis_samples(bound: f64, spacing: f64) -> Vec<f64> {
    let count = axis_count(bound, spacing).unwrap_or(0);
    (0..count).map(|i| -bound + i as f64 * spacing).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(width: f64, height: f64, spacing: f64, edge_offset: f64) -> GridSpec {
        GridSpec {
            width,
            height,
            spacing,
            edge_offset,
            takeoff_altitude: 0.5,
            survey_altitude: 1.25,
        }
    }

    fn assert_within_bounds(spec: &GridSpec, waypoints: &[Waypoint]) {
        let bx = spec.width / 2.0 - spec.edge_offset + BOUND_EPSILON;
        let by = spec.height / 2.0 - spec.edge_offset + BOUND_EPSILON;
        for wp in &waypoints[1..waypoints.len() - 1] {
            assert!(wp.x >= -bx && wp.x <= bx, "x out of bounds: {}", wp);
            assert!(wp.y >= -by && wp.y <= by, "y out of bounds: {}", wp);
            assert_eq!(wp.z, spec.survey_altitude);
            assert_eq!(wp.yaw, 0.0);
        }
    }

    #[test]
    fn test_default_survey_layout() {
        let spec = GridSpec::default();
        let waypoints = generate_grid(&spec);

        // x: -2, 0, 2 / y: -3.5, -1.5, 0.5, 2.5
        assert_eq!(waypoints.len(), 3 * 4 + 2);
        assert_eq!(waypoints[0], spec.takeoff_point());
        assert_eq!(waypoints[waypoints.len() - 1], spec.takeoff_point());
        assert_eq!(waypoints[1], Waypoint::new(-2.0, -3.5, 1.25, 0.0));
        assert_eq!(waypoints[4], Waypoint::new(-2.0, 2.5, 1.25, 0.0));
        assert_within_bounds(&spec, &waypoints);
    }

    #[test]
    fn test_rows_alternate_direction() {
        let spec = spec(4.0, 4.0, 1.0, 1.0);
        let waypoints = generate_grid(&spec);
        let interior = &waypoints[1..waypoints.len() - 1];

        // x: -1, 0, 1 / y: -1, 0, 1
        let ys: Vec<f64> = interior.iter().map(|wp| wp.y).collect();
        assert_eq!(ys, vec![-1.0, 0.0, 1.0, 1.0, 0.0, -1.0, -1.0, 0.0, 1.0]);
        let xs: Vec<f64> = interior.iter().map(|wp| wp.x).collect();
        assert_eq!(xs, vec![-1.0, -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_samples_never_exceed_bound() {
        for (w, h, s, o) in [
            (5.0, 5.0, 2.5, 0.5),
            (10.0, 3.0, 0.7, 0.2),
            (7.3, 9.1, 1.3, 1.1),
            (2.0, 2.0, 5.0, 0.5),
        ] {
            let spec = spec(w, h, s, o);
            let waypoints = generate_grid(&spec);
            assert!(waypoints.len() >= 3);
            assert_eq!(waypoints[0], spec.takeoff_point());
            assert_eq!(*waypoints.last().unwrap(), spec.takeoff_point());
            assert_within_bounds(&spec, &waypoints);
        }
    }

    #[test]
    fn test_degenerate_geometry_yields_no_interior() {
        for spec in [
            spec(4.0, 4.0, 0.0, 0.5),
            spec(4.0, 4.0, -1.0, 0.5),
            spec(4.0, 4.0, 1.0, 2.0),
            spec(10.0, 4.0, 1.0, 3.0),
            spec(0.0, 4.0, 1.0, 0.0),
            spec(4.0, 4.0, f64::NAN, 0.5),
        ] {
            let waypoints = generate_grid(&spec);
            assert_eq!(waypoints, vec![spec.takeoff_point(), spec.takeoff_point()]);
        }
    }

    #[test]
    fn test_oversized_grid_is_capped() {
        let huge = spec(1.0e6, 1.0e6, 1.0e-9, 0.5);
        assert_eq!(huge.interior_len(), None);
        assert_eq!(generate_grid(&huge), vec![huge.takeoff_point(), huge.takeoff_point()]);

        // 各軸は上限内でも積で判定する
        let wide = spec(1000.0, 1000.0, 1.0, 0.0);
        assert_eq!(wide.interior_len(), None);

        assert_eq!(GridSpec::default().interior_len(), Some(12));
    }
}
