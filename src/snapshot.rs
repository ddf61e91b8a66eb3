use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::feed_monitor::FeedStatus;
use crate::geodesy::{haversine_distance, initial_bearing};
use crate::routing::StitchedRoute;
use crate::types::{FilteredPosition, NavigationSession, RoutePlan, RouteSummary, Stop, StopId};

/// Where the current target lies from the filtered position
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TargetInfo {
    pub stop_id: StopId,
    pub distance_m: f64,
    pub bearing_deg: f64,
}

impl TargetInfo {
    pub fn between(position: &FilteredPosition, target: &Stop) -> Self {
        TargetInfo {
            stop_id: target.id,
            distance_m: haversine_distance(position.point, target.position),
            bearing_deg: initial_bearing(position.point, target.position),
        }
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct FilterStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Read-only view of everything a display needs, rebuilt on every change.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DisplaySnapshot {
    pub generated_at: String,
    pub filtered: Option<FilteredPosition>,
    pub session: NavigationSession,
    pub plan: RoutePlan,
    pub summary: RouteSummary,
    pub target: Option<TargetInfo>,
    pub route: Option<StitchedRoute>,
    /// Drawn route contains straight-line substitutes
    pub route_approximate: bool,
    pub stops: Vec<Stop>,
    pub feed: FeedStatus,
    pub filter: FilterStats,
}

impl DisplaySnapshot {
    pub fn new() -> Self {
        let plan = RoutePlan::empty();
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            filtered: None,
            session: NavigationSession::default(),
            summary: plan.summary(),
            plan,
            target: None,
            route: None,
            route_approximate: false,
            stops: Vec::new(),
            feed: FeedStatus {
                healthy: true,
                ..FeedStatus::default()
            },
            filter: FilterStats::default(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for DisplaySnapshot {
    fn default() -> Self {
        Self::new()
    }
}
