//! Visiting-order heuristic: nearest-neighbor construction refined by 2-opt.
//!
//! Node 0 of every tour is the fixed start point; nodes `1..=n` are the stops
//! sorted by id, so index order doubles as the id tie-break.

pub mod nearest_neighbor;
pub mod two_opt;

pub use nearest_neighbor::nearest_neighbor_tour;
pub use two_opt::{improve_tour, TwoOptStats};

use nalgebra::DMatrix;
use std::collections::HashSet;

use crate::config::PlannerConfig;
use crate::error::{NavError, Result};
use crate::geodesy::{haversine_distance, path_length};
use crate::types::{GeoPoint, RoutePlan, Stop};

/// Symmetric haversine distances over `{start} ∪ stops`, computed once per plan.
pub struct DistanceMatrix {
    distances: DMatrix<f64>,
}

impl DistanceMatrix {
    pub fn build(points: &[GeoPoint]) -> Self {
        let n = points.len();
        let mut distances = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in (i + 1)..n {
                let d = haversine_distance(points[i], points[j]);
                distances[(i, j)] = d;
                distances[(j, i)] = d;
            }
        }
        DistanceMatrix { distances }
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.distances[(i, j)]
    }

    pub fn size(&self) -> usize {
        self.distances.nrows()
    }

    /// Open-path length of a tour given as node indices.
    pub fn tour_length(&self, tour: &[usize]) -> f64 {
        tour.windows(2).map(|pair| self.get(pair[0], pair[1])).sum()
    }
}

/// Diagnostics from one planning run.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanStats {
    pub nearest_neighbor_distance_meters: f64,
    pub two_opt: TwoOptStats,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanOutcome {
    pub plan: RoutePlan,
    pub stats: PlanStats,
}

/// Compute a visiting order for `stops` starting at `start`.
///
/// Deterministic for identical inputs regardless of the order `stops` is given in.
pub fn plan(start: Option<GeoPoint>, stops: &[Stop], config: &PlannerConfig) -> Result<RoutePlan> {
    plan_detailed(start, stops, config).map(|outcome| outcome.plan)
}

pub fn plan_detailed(
    start: Option<GeoPoint>,
    stops: &[Stop],
    config: &PlannerConfig,
) -> Result<PlanOutcome> {
    let start = start.ok_or(NavError::NoStartPosition)?;
    start.validate()?;

    let mut seen = HashSet::with_capacity(stops.len());
    for stop in stops {
        stop.position.validate()?;
        if !seen.insert(stop.id) {
            return Err(NavError::InvalidInput(format!("duplicate stop id {}", stop.id)));
        }
    }

    if stops.is_empty() {
        return Ok(PlanOutcome {
            plan: RoutePlan::empty(),
            stats: PlanStats {
                nearest_neighbor_distance_meters: 0.0,
                two_opt: TwoOptStats::default(),
            },
        });
    }

    let mut sorted: Vec<&Stop> = stops.iter().collect();
    sorted.sort_by_key(|stop| stop.id);

    let mut points = Vec::with_capacity(sorted.len() + 1);
    points.push(start);
    points.extend(sorted.iter().map(|stop| stop.position));

    let matrix = DistanceMatrix::build(&points);
    let mut tour = nearest_neighbor_tour(&matrix);
    let nearest_neighbor_distance_meters = matrix.tour_length(&tour);

    let two_opt = improve_tour(&matrix, &mut tour, config.two_opt_max_iterations);

    let order: Vec<_> = tour[1..].iter().map(|&node| sorted[node - 1].id).collect();
    let ordered_points: Vec<GeoPoint> = tour.iter().map(|&node| points[node]).collect();
    let total_distance_meters = path_length(&ordered_points);

    log::debug!(
        "planned {} stops: nearest neighbor {:.0} m, after 2-opt {:.0} m ({} improvements)",
        order.len(),
        nearest_neighbor_distance_meters,
        total_distance_meters,
        two_opt.improvements
    );

    Ok(PlanOutcome {
        plan: RoutePlan {
            order,
            total_distance_meters,
        },
        stats: PlanStats {
            nearest_neighbor_distance_meters,
            two_opt,
        },
    })
}
