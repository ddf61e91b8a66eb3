use super::DistanceMatrix;

/// Greedy construction from node 0: always extend to the closest unplaced node.
///
/// Ties go to the lowest node index (lowest stop id).
pub fn nearest_neighbor_tour(matrix: &DistanceMatrix) -> Vec<usize> {
    let n = matrix.size();
    if n == 0 {
        return Vec::new();
    }

    let mut tour = Vec::with_capacity(n);
    let mut placed = vec![false; n];
    tour.push(0);
    placed[0] = true;

    let mut last = 0;
    for _ in 1..n {
        let mut best: Option<(usize, f64)> = None;
        for candidate in 1..n {
            if placed[candidate] {
                continue;
            }
            let d = matrix.get(last, candidate);
            // Strict comparison keeps the earliest index on ties
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((candidate, d));
            }
        }
        let Some((next, _)) = best else {
            break;
        };
        placed[next] = true;
        tour.push(next);
        last = next;
    }

    tour
}
