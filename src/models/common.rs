use std::fmt;
use std::ops::{Add, Mul, Sub};

/// 3次元位置を表す構造体
///
/// 機体のポーズサンプルやROI目標点として使用します。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position3D {
    pub x: f64, // m
    pub y: f64, // m
    pub z: f64, // m (altitude)
}

impl Position3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// 3次元距離を計算
    pub fn distance_3d(&self, other: &Position3D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }

    /// ベクトルの長さ（原点からの距離）
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }

    /// ヨー角0のウェイポイントに変換
    ///
    /// 迂回先および復帰点は機首方位を保持しない。
    pub fn to_waypoint(&self) -> Waypoint {
        Waypoint::new(self.x, self.y, self.z, 0.0)
    }
}

impl Add for Position3D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Position3D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f64> for Position3D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

impl fmt::Display for Position3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// 4次元ウェイポイント（位置 + ヨー角）
///
/// ミッション計画に格納された後は変更されません。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Waypoint {
    pub x: f64,   // m
    pub y: f64,   // m
    pub z: f64,   // m
    pub yaw: f64, // rad
}

impl Waypoint {
    pub fn new(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Self { x, y, z, yaw }
    }

    /// `[x, y, z, yaw]` 形式の行からウェイポイントを作成
    ///
    /// 要素数が4でない場合、または有限値でない要素を含む場合はエラー。
    pub fn from_row(row: &[f64]) -> Result<Self, String> {
        if row.len() != 4 {
            return Err(format!("expected 4 values [x, y, z, yaw], got {}", row.len()));
        }
        if let Some(v) = row.iter().find(|v| !v.is_finite()) {
            return Err(format!("non-finite value {}", v));
        }
        Ok(Self::new(row[0], row[1], row[2], row[3]))
    }

    /// 全要素が有限値かどうか
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.yaw.is_finite()
    }

    pub fn position(&self) -> Position3D {
        Position3D::new(self.x, self.y, self.z)
    }

    /// ヨー角を0にしたコピー
    pub fn with_zero_yaw(&self) -> Self {
        Self { yaw: 0.0, ..*self }
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.2}, {:.2}, {:.2}, {:.2}]", self.x, self.y, self.z, self.yaw)
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use std::f64::consts::PI;

    /// 角度を-π〜πの範囲に正規化
    pub fn normalize_angle(angle_rad: f64) -> f64 {
        let mut normalized = angle_rad % (2.0 * PI);
        if normalized > PI {
            normalized -= 2.0 * PI;
        } else if normalized <= -PI {
            normalized += 2.0 * PI;
        }
        normalized
    }

    /// 2つの角度の差を計算（-π〜πの範囲）
    pub fn angle_difference(from_rad: f64, to_rad: f64) -> f64 {
        normalize_angle(to_rad - from_rad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_waypoint_from_row() {
        let wp = Waypoint::from_row(&[1.0, 2.0, 3.0, 0.5]).unwrap();
        assert_eq!(wp, Waypoint::new(1.0, 2.0, 3.0, 0.5));

        assert!(Waypoint::from_row(&[1.0, 2.0, 3.0]).is_err());
        assert!(Waypoint::from_row(&[1.0, 2.0, 3.0, 0.0, 9.0]).is_err());
        assert!(Waypoint::from_row(&[1.0, f64::NAN, 3.0, 0.0]).is_err());
    }

    #[test]
    fn test_to_waypoint_discards_heading() {
        let wp = Position3D::new(1.0, -2.0, 1.5).to_waypoint();
        assert_eq!(wp, Waypoint::new(1.0, -2.0, 1.5, 0.0));
    }

    #[test]
    fn test_angle_difference_wraps() {
        let d = math_utils::angle_difference(PI - 0.1, -PI + 0.1);
        assert!((d - 0.2).abs() < 1e-9);
        assert!((math_utils::normalize_angle(3.0 * PI) - PI).abs() < 1e-9);
    }
}
