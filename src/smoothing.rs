/// Weight schemes for the position history window.
///
/// Moving: recency ramp, newest sample weighted most.
/// Stationary: inverse accuracy, tighter fixes weighted most.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionState {
    Moving,
    Stationary,
}

impl MotionState {
    /// Unknown speed counts as stationary.
    pub fn classify(speed_mps: Option<f64>, moving_threshold: f64) -> Self {
        match speed_mps {
            Some(speed) if speed > moving_threshold => MotionState::Moving,
            _ => MotionState::Stationary,
        }
    }
}

/// `w_i = 0.1 + 0.9 * (i + 1) / n` for a window of `n` samples, oldest first.
pub fn recency_weights(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.1 + 0.9 * (i as f64 + 1.0) / n as f64)
        .collect()
}

/// `w = 1 / max(0.1, accuracy * 0.8)`
pub fn accuracy_weight(accuracy_meters: f64) -> f64 {
    1.0 / (accuracy_meters * 0.8).max(0.1)
}

/// Weighted mean of `(value, weight)` pairs. `None` if the weights sum to zero.
pub fn weighted_mean<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (sum, total) = pairs
        .into_iter()
        .fold((0.0, 0.0), |(sum, total), (value, weight)| {
            (sum + value * weight, total + weight)
        });
    if total > 0.0 {
        Some(sum / total)
    } else {
        None
    }
}

/// Circular mean of headings in degrees, normalized to [0, 360).
///
/// An arithmetic mean breaks across north (350 and 10 would give 180).
pub fn circular_mean_degrees(headings: &[f64]) -> Option<f64> {
    if headings.is_empty() {
        return None;
    }
    let (sin_sum, cos_sum) = headings.iter().fold((0.0, 0.0), |(s, c), h| {
        let rad = h.to_radians();
        (s + rad.sin(), c + rad.cos())
    });
    Some(normalize_degrees(sin_sum.atan2(cos_sum).to_degrees()))
}

pub fn normalize_degrees(degrees: f64) -> f64 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to exactly 360.0
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Smallest absolute angle between two headings, in degrees.
pub fn angular_difference(a: f64, b: f64) -> f64 {
    let diff = normalize_degrees(a - b);
    diff.min(360.0 - diff)
}
