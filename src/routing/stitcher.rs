//! Sequential per-segment routing with straight-line fallback.
//!
//! Segments are requested one at a time with a pause in between so a public
//! routing service never sees a burst. A failed, empty or timed-out segment
//! is replaced by the straight pair of its endpoints and the whole result is
//! flagged as fallback. Cancellation discards everything.

use geo::LineString;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{RouteLeg, RoutingOracle};
use crate::config::RoutingConfig;
use crate::error::{NavError, Result, RoutingError};
use crate::geodesy::haversine_distance;
use crate::types::GeoPoint;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSource {
    Road,
    StraightLine,
}

/// Outcome of one segment request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SegmentReport {
    /// Indices into the stitched polyline covered by this segment
    pub range: Range<usize>,
    pub source: SegmentSource,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    /// Why the segment fell back
    pub error: Option<RoutingError>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StitchedRoute {
    pub polyline: Vec<GeoPoint>,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    /// Set if any segment is a straight-line substitute
    pub fallback: bool,
    pub segments: Vec<SegmentReport>,
}

impl StitchedRoute {
    fn at(start: GeoPoint) -> Self {
        StitchedRoute {
            polyline: vec![start],
            total_distance_meters: 0.0,
            total_duration_seconds: 0.0,
            fallback: false,
            segments: Vec::new(),
        }
    }

    /// Polyline as a `geo` line string (x = longitude, y = latitude).
    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::from(
            self.polyline
                .iter()
                .map(|p| (p.longitude, p.latitude))
                .collect::<Vec<_>>(),
        )
    }

    pub fn fallback_segment_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.source == SegmentSource::StraightLine)
            .count()
    }

    fn push_segment(&mut self, points: Vec<GeoPoint>, report: SegmentReport) {
        self.polyline.extend(points);
        self.total_distance_meters += report.distance_meters;
        self.total_duration_seconds += report.duration_seconds;
        self.fallback |= report.source == SegmentSource::StraightLine;
        self.segments.push(report);
    }
}

pub struct Stitcher<O> {
    oracle: Arc<O>,
    config: RoutingConfig,
}

impl<O> Clone for Stitcher<O> {
    fn clone(&self) -> Self {
        Stitcher {
            oracle: Arc::clone(&self.oracle),
            config: self.config.clone(),
        }
    }
}

impl<O: RoutingOracle> Stitcher<O> {
    pub fn new(oracle: Arc<O>, config: RoutingConfig) -> Self {
        Stitcher { oracle, config }
    }

    /// Stitch road legs for `[start] + order`.
    ///
    /// Returns `NavError::Cancelled` if `cancel` fires at any point; no partial
    /// route is returned in that case.
    pub async fn stitch(
        &self,
        start: GeoPoint,
        order: &[GeoPoint],
        cancel: &CancellationToken,
    ) -> Result<StitchedRoute> {
        if order.is_empty() {
            return Ok(StitchedRoute::at(start));
        }

        let mut route = StitchedRoute {
            polyline: Vec::with_capacity(order.len() * 2),
            ..StitchedRoute::at(start)
        };

        let mut from = start;
        for (index, &to) in order.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(NavError::Cancelled),
                    _ = tokio::time::sleep(self.config.inter_request_pause()) => {}
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NavError::Cancelled),
                _ = self.oracle.ready() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NavError::Cancelled),
                result = tokio::time::timeout(self.config.segment_timeout(), self.oracle.route(from, to)) => {
                    match result {
                        Ok(Ok(leg)) if leg.points.is_empty() => Err(RoutingError::NoRoute),
                        Ok(other) => other,
                        Err(_) => Err(RoutingError::Timeout),
                    }
                }
            };

            let start_index = route.polyline.len();
            match outcome {
                Ok(RouteLeg {
                    points,
                    distance_meters,
                    duration_seconds,
                }) => {
                    let range = start_index..start_index + points.len();
                    route.push_segment(
                        points,
                        SegmentReport {
                            range,
                            source: SegmentSource::Road,
                            distance_meters,
                            duration_seconds,
                            error: None,
                        },
                    );
                }
                Err(error) => {
                    log::warn!(
                        "segment {} of {} falls back to a straight line: {}",
                        index + 1,
                        order.len(),
                        error
                    );
                    let distance_meters = haversine_distance(from, to);
                    route.push_segment(
                        vec![from, to],
                        SegmentReport {
                            range: start_index..start_index + 2,
                            source: SegmentSource::StraightLine,
                            distance_meters,
                            duration_seconds: distance_meters / self.config.fallback_speed_mps,
                            error: Some(error),
                        },
                    );
                }
            }

            from = to;
        }

        log::info!(
            "stitched {} segments: {:.0} m, {:.0} s{}",
            route.segments.len(),
            route.total_distance_meters,
            route.total_duration_seconds,
            if route.fallback { " (approximate)" } else { "" }
        );

        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::OfflineOracle;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Road legs through the midpoint, with a per-call counter
    #[derive(Default)]
    struct MidpointOracle {
        calls: AtomicUsize,
        fail_call: Option<usize>,
    }

    impl RoutingOracle for MidpointOracle {
        async fn route(&self, from: GeoPoint, to: GeoPoint) -> std::result::Result<RouteLeg, RoutingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_call == Some(call) {
                return Err(RoutingError::Http(503));
            }
            let mid = GeoPoint::new(
                (from.latitude + to.latitude) / 2.0,
                (from.longitude + to.longitude) / 2.0,
            );
            Ok(RouteLeg {
                points: vec![from, mid, to],
                distance_meters: 1000.0,
                duration_seconds: 60.0,
            })
        }
    }

    struct HangingOracle;

    impl RoutingOracle for HangingOracle {
        async fn route(&self, _from: GeoPoint, _to: GeoPoint) -> std::result::Result<RouteLeg, RoutingError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(RoutingError::NoRoute)
        }
    }

    /// Paces every request by 20 s, well past the segment timeout
    struct PacedOracle;

    impl RoutingOracle for PacedOracle {
        async fn ready(&self) {
            tokio::time::sleep(Duration::from_secs(20)).await;
        }

        async fn route(&self, from: GeoPoint, to: GeoPoint) -> std::result::Result<RouteLeg, RoutingError> {
            Ok(RouteLeg {
                points: vec![from, to],
                distance_meters: 500.0,
                duration_seconds: 45.0,
            })
        }
    }

    struct EmptyOracle;

    impl RoutingOracle for EmptyOracle {
        async fn route(&self, _from: GeoPoint, _to: GeoPoint) -> std::result::Result<RouteLeg, RoutingError> {
            Ok(RouteLeg {
                points: Vec::new(),
                distance_meters: 0.0,
                duration_seconds: 0.0,
            })
        }
    }

    fn waypoints() -> (GeoPoint, Vec<GeoPoint>) {
        (
            GeoPoint::new(49.50, 7.00),
            vec![
                GeoPoint::new(49.51, 7.01),
                GeoPoint::new(49.49, 7.02),
                GeoPoint::new(49.50, 7.03),
            ],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_oracle_gives_straight_segments() {
        let (start, order) = waypoints();
        let stitcher = Stitcher::new(Arc::new(OfflineOracle), RoutingConfig::default());
        let route = stitcher
            .stitch(start, &order, &CancellationToken::new())
            .await
            .unwrap();

        let mut expected = Vec::new();
        let mut from = start;
        for &to in &order {
            expected.push(from);
            expected.push(to);
            from = to;
        }
        assert_eq!(route.polyline, expected);
        assert!(route.fallback);
        assert_eq!(route.fallback_segment_count(), 3);

        let straight: f64 = route.polyline.chunks(2).map(|p| haversine_distance(p[0], p[1])).sum();
        assert_relative_eq!(route.total_distance_meters, straight, max_relative = 1e-12);
        assert_relative_eq!(
            route.total_duration_seconds,
            straight / RoutingConfig::default().fallback_speed_mps,
            max_relative = 1e-12
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_road_segments_concatenate_in_order() {
        let (start, order) = waypoints();
        let stitcher = Stitcher::new(Arc::new(MidpointOracle::default()), RoutingConfig::default());
        let route = stitcher
            .stitch(start, &order, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!route.fallback);
        assert_eq!(route.polyline.len(), 9);
        assert_eq!(route.polyline[0], start);
        assert_eq!(route.polyline[8], order[2]);
        assert_eq!(route.segments[1].range, 3..6);
        assert_eq!(route.total_distance_meters, 3000.0);
        assert_eq!(route.total_duration_seconds, 180.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_only_affects_its_segment() {
        let (start, order) = waypoints();
        let oracle = MidpointOracle {
            fail_call: Some(1),
            ..MidpointOracle::default()
        };
        let stitcher = Stitcher::new(Arc::new(oracle), RoutingConfig::default());
        let route = stitcher
            .stitch(start, &order, &CancellationToken::new())
            .await
            .unwrap();

        assert!(route.fallback);
        assert_eq!(route.fallback_segment_count(), 1);
        assert_eq!(route.segments[1].source, SegmentSource::StraightLine);
        assert_eq!(route.segments[1].error, Some(RoutingError::Http(503)));
        assert_eq!(&route.polyline[3..5], &[order[0], order[1]]);
        assert_eq!(route.polyline.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let (start, order) = waypoints();
        let stitcher = Stitcher::new(Arc::new(HangingOracle), RoutingConfig::default());
        let route = stitcher
            .stitch(start, &order[..1], &CancellationToken::new())
            .await
            .unwrap();
        assert!(route.fallback);
        assert_eq!(route.segments[0].error, Some(RoutingError::Timeout));
        assert_eq!(route.polyline, vec![start, order[0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_leg_falls_back() {
        let (start, order) = waypoints();
        let stitcher = Stitcher::new(Arc::new(EmptyOracle), RoutingConfig::default());
        let route = stitcher
            .stitch(start, &order[..1], &CancellationToken::new())
            .await
            .unwrap();
        assert!(route.fallback);
        assert_eq!(route.segments[0].error, Some(RoutingError::NoRoute));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_result() {
        let (start, order) = waypoints();
        let stitcher = Stitcher::new(Arc::new(HangingOracle), RoutingConfig::default());
        let cancel = CancellationToken::new();

        let task = {
            let stitcher = stitcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { stitcher.stitch(start, &order, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), Err(NavError::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_order() {
        let start = GeoPoint::new(49.5, 7.0);
        let stitcher = Stitcher::new(Arc::new(OfflineOracle), RoutingConfig::default());
        let route = stitcher
            .stitch(start, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(route.polyline, vec![start]);
        assert_eq!(route.total_distance_meters, 0.0);
        assert!(!route.fallback);
        assert_eq!(route.to_line_string().0.len(), 1);
    }

    #[test]
    fn test_line_string_axis_order() {
        let mut route = StitchedRoute::at(GeoPoint::new(49.5, 7.0));
        route.polyline.push(GeoPoint::new(49.6, 7.1));
        let line = route.to_line_string();
        assert_eq!(line.0[0].x, 7.0);
        assert_eq!(line.0[0].y, 49.5);
        assert_eq!(line.0[1].x, 7.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_wait_is_not_a_timeout() {
        let (start, order) = waypoints();
        let stitcher = Stitcher::new(Arc::new(PacedOracle), RoutingConfig::default());
        let route = stitcher
            .stitch(start, &order[..1], &CancellationToken::new())
            .await
            .unwrap();
        assert!(!route.fallback);
        assert_eq!(route.segments[0].source, SegmentSource::Road);
        assert_eq!(route.segments[0].error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_pacing() {
        let (start, order) = waypoints();
        let stitcher = Stitcher::new(Arc::new(PacedOracle), RoutingConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let result = stitcher.stitch(start, &order, &cancel).await;
        assert_eq!(result, Err(NavError::Cancelled));
    }
}
