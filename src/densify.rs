//! # Densify モジュール
//!
//! 測量グリッドの疎な点列を、外部の経路計画サービスを使って障害物を考慮した
//! 密な点列に変換します。
//!
//! 入力は `(start, intermediate, end)` の3点ずつ、端点を共有しながら処理し、
//! 中間点を経路のヒントとしてサービスに渡します。応答ごとに最適化済みの疎な
//! 経路を優先し、空なら全経路を使います。どちらも空の区間は記録して読み飛ばし、
//! ミッションはその区間だけ短くなります。

use crate::models::{RoutingClient, Waypoint};
use tracing::{debug, error, info};

/// 経路計画サービスで点列を高密度化
pub async fn densify<R: RoutingClient>(client: &mut R, waypoints: &[Waypoint]) -> Vec<Waypoint> {
    if waypoints.len() < 2 {
        return waypoints.iter().map(Waypoint::with_zero_yaw).collect();
    }

    client.wait_for_service().await;

    let segments = segments(waypoints);
    let mut dense = Vec::new();
    let mut skipped = 0;

    for (n, (start, hint, end)) in segments.iter().enumerate() {
        let path = match client.request_path(*start, *end, *hint).await {
            Ok(path) => path,
            Err(e) => {
                error!("区間{}の経路要求に失敗しました: {}", n, e);
                skipped += 1;
                continue;
            }
        };

        let points = if !path.sparse.is_empty() {
            path.sparse
        } else if !path.full.is_empty() {
            debug!("区間{}: 疎な経路が空のため全経路を使用", n);
            path.full
        } else {
            error!("区間{}: 有効な経路がありません ({} -> {})", n, start, end);
            skipped += 1;
            continue;
        };

        dense.extend(points.iter().map(Waypoint::with_zero_yaw));
    }

    info!(
        "経路高密度化完了: {}点 -> {}点 ({}区間中{}区間をスキップ)",
        waypoints.len(),
        dense.len(),
        segments.len(),
        skipped
    );

    dense
}

/// `(start, hint, end)` 区間に分割
///
/// 偶数長の入力で余った末尾の2点は、終点をヒントとする区間になる。
fn segments(waypoints: &[Waypoint]) -> Vec<(Waypoint, Waypoint, Waypoint)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 2 < waypoints.len() {
        out.push((waypoints[i], waypoints[i + 1], waypoints[i + 2]));
        i += 2;
    }
    if i + 1 < waypoints.len() {
        out.push((waypoints[i], waypoints[i + 1], waypoints[i + 1]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlannedPath, RoutingError};
    use std::collections::VecDeque;

    /// 応答を順に返すルーティングサービスのモック
    struct ScriptedRouter {
        responses: VecDeque<Result<PlannedPath, RoutingError>>,
        requests: Vec<(Waypoint, Waypoint, Waypoint)>,
        waited: bool,
    }

    impl ScriptedRouter {
        fn new(responses: Vec<Result<PlannedPath, RoutingError>>) -> Self {
            Self {
                responses: responses.into(),
                requests: Vec::new(),
                waited: false,
            }
        }
    }

    impl RoutingClient for ScriptedRouter {
        async fn wait_for_service(&mut self) {
            self.waited = true;
        }

        async fn request_path(
            &mut self,
            start: Waypoint,
            end: Waypoint,
            hint: Waypoint,
        ) -> Result<PlannedPath, RoutingError> {
            self.requests.push((start, hint, end));
            self.responses.pop_front().unwrap_or_else(|| Ok(PlannedPath::default()))
        }
    }

    fn wp(x: f64, yaw: f64) -> Waypoint {
        Waypoint::new(x, 0.0, 1.0, yaw)
    }

    #[test]
    fn test_segments_share_endpoints() {
        let pts: Vec<Waypoint> = (0..5).map(|i| wp(i as f64, 0.0)).collect();
        let segs = segments(&pts);
        assert_eq!(segs, vec![(pts[0], pts[1], pts[2]), (pts[2], pts[3], pts[4])]);

        let segs = segments(&pts[..4]);
        assert_eq!(segs, vec![(pts[0], pts[1], pts[2]), (pts[2], pts[3], pts[3])]);
    }

    #[tokio::test]
    async fn test_prefers_sparse_then_full() {
        let mut router = ScriptedRouter::new(vec![
            Ok(PlannedPath {
                sparse: vec![wp(1.0, 0.3), wp(2.0, 0.3)],
                full: vec![wp(9.0, 0.0)],
            }),
            Ok(PlannedPath {
                sparse: vec![],
                full: vec![wp(3.0, 1.0), wp(4.0, -1.0)],
            }),
        ]);
        let input: Vec<Waypoint> = (0..5).map(|i| wp(i as f64, 0.5)).collect();

        let out = densify(&mut router, &input).await;

        assert!(router.waited);
        assert_eq!(router.requests.len(), 2);
        assert_eq!(router.requests[0].1, input[1]);
        assert_eq!(out, vec![wp(1.0, 0.0), wp(2.0, 0.0), wp(3.0, 0.0), wp(4.0, 0.0)]);
    }

    #[tokio::test]
    async fn test_empty_segment_is_skipped() {
        let mut router = ScriptedRouter::new(vec![
            Ok(PlannedPath::default()),
            Err(RoutingError::Failed("no solution".to_string())),
            Ok(PlannedPath {
                sparse: vec![wp(6.0, 0.0)],
                full: vec![],
            }),
        ]);
        let input: Vec<Waypoint> = (0..7).map(|i| wp(i as f64, 0.0)).collect();

        let out = densify(&mut router, &input).await;

        assert_eq!(router.requests.len(), 3);
        assert_eq!(out, vec![wp(6.0, 0.0)]);
    }

    #[tokio::test]
    async fn test_single_point_passes_through() {
        let mut router = ScriptedRouter::new(vec![]);
        let out = densify(&mut router, &[wp(1.0, 2.0)]).await;
        assert_eq!(out, vec![wp(1.0, 0.0)]);
        assert!(router.requests.is_empty());
    }
}
