use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use super::GeoPoint;

pub type StopId = u32;

/// A delivery location with a resolved position.
///
/// `visited` only ever flips false -> true, and only through the navigator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopId,
    pub position: GeoPoint,
    pub has_annotation: bool,
    /// Free-text delivery hint carried over from the import.
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    visited: bool,
}

impl Stop {
    pub fn new(id: StopId, position: GeoPoint) -> Self {
        Stop {
            id,
            position,
            has_annotation: false,
            note: None,
            visited: false,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.has_annotation = !note.trim().is_empty();
        self.note = Some(note);
        self
    }

    pub fn is_visited(&self) -> bool {
        self.visited
    }

    pub(crate) fn mark_visited(&mut self) {
        self.visited = true;
    }

    pub(crate) fn reset_visited(&mut self) {
        self.visited = false;
    }
}

/// Visiting order produced by the planner. Never mutated once built.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    /// Stop ids in visiting order, start point excluded.
    pub order: Vec<StopId>,
    pub total_distance_meters: f64,
}

impl RoutePlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn summary(&self) -> RouteSummary {
        RouteSummary {
            stop_count: self.order.len(),
            total_distance_km: self.total_distance_meters / 1000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub stop_count: usize,
    pub total_distance_km: f64,
}

impl Display for RouteSummary {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} stops, {:.2} km", self.stop_count, self.total_distance_km)
    }
}

/// Read-only view of the navigator's progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationSession {
    pub active: bool,
    /// Index into `RoutePlan::order`.
    pub current_target_index: usize,
    pub completed_count: usize,
    pub pending_count: usize,
}
