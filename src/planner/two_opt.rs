use super::DistanceMatrix;

/// Gains below this are treated as float noise, not improvements.
const MIN_GAIN_M: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TwoOptStats {
    /// Scans started (bounded by the iteration cap)
    pub iterations: usize,
    /// Reversals applied
    pub improvements: usize,
    /// True if the cap stopped the search before a clean scan
    pub hit_iteration_cap: bool,
}

/// First-improvement 2-opt over an open path with a fixed first node.
///
/// For each pair `1 <= i < j <= n-1` the edges `(i-1, i)` and `(j, j+1)` are
/// compared against `(i-1, j)` and `(i, j+1)`; a strictly shorter pairing
/// reverses `tour[i..=j]` and restarts the scan. The search ends after a scan
/// with no improvement or after `max_iterations` scans.
pub fn improve_tour(matrix: &DistanceMatrix, tour: &mut [usize], max_iterations: usize) -> TwoOptStats {
    let mut stats = TwoOptStats::default();
    // Start plus at least three stops are needed for a movable pair
    if tour.len() < 4 {
        return stats;
    }
    let last = tour.len() - 1;

    'scan: loop {
        if stats.iterations >= max_iterations {
            stats.hit_iteration_cap = true;
            break;
        }
        stats.iterations += 1;

        for i in 1..last - 1 {
            for j in (i + 1)..last {
                let current = matrix.get(tour[i - 1], tour[i]) + matrix.get(tour[j], tour[j + 1]);
                let swapped = matrix.get(tour[i - 1], tour[j]) + matrix.get(tour[i], tour[j + 1]);
                if swapped + MIN_GAIN_M < current {
                    tour[i..=j].reverse();
                    stats.improvements += 1;
                    continue 'scan;
                }
            }
        }

        break;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;

    fn crossing_points() -> Vec<GeoPoint> {
        // Start, then a zig-zag that NN-style ordering 0,1,2,3,4 crosses itself
        vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.02),
            GeoPoint::new(0.01, 0.01),
            GeoPoint::new(0.0, 0.01),
            GeoPoint::new(0.01, 0.03),
        ]
    }

    #[test]
    fn test_uncrosses_tour() {
        let matrix = DistanceMatrix::build(&crossing_points());
        let mut tour = vec![0, 1, 2, 3, 4];
        let before = matrix.tour_length(&tour);
        let stats = improve_tour(&matrix, &mut tour, 100);
        let after = matrix.tour_length(&tour);

        assert!(stats.improvements > 0);
        assert!(after < before);
        assert_eq!(tour[0], 0);
        let mut nodes = tour.clone();
        nodes.sort();
        assert_eq!(nodes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_short_tours_untouched() {
        let matrix = DistanceMatrix::build(&crossing_points()[..3]);
        let mut tour = vec![0, 2, 1];
        let stats = improve_tour(&matrix, &mut tour, 100);
        assert_eq!(tour, vec![0, 2, 1]);
        assert_eq!(stats, TwoOptStats::default());
    }

    #[test]
    fn test_iteration_cap() {
        let matrix = DistanceMatrix::build(&crossing_points());
        let mut tour = vec![0, 1, 2, 3, 4];
        let stats = improve_tour(&matrix, &mut tour, 0);
        assert!(stats.hit_iteration_cap);
        assert_eq!(stats.iterations, 0);
        assert_eq!(tour, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_optimal_tour_is_stable() {
        let points = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.01),
            GeoPoint::new(0.0, 0.02),
            GeoPoint::new(0.0, 0.03),
        ];
        let matrix = DistanceMatrix::build(&points);
        let mut tour = vec![0, 1, 2, 3];
        let stats = improve_tour(&matrix, &mut tour, 100);
        assert_eq!(tour, vec![0, 1, 2, 3]);
        assert_eq!(stats.iterations, 1);
        assert_eq!(stats.improvements, 0);
        assert!(!stats.hit_iteration_cap);
    }
}
