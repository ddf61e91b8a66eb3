//! Navigation state machine: Idle -> Active -> Idle.
//!
//! The navigator owns the stop set, the current plan and the visit progress.
//! It never plans or routes by itself; callers hand it a ready `RoutePlan`
//! (`activate`, `replace_plan`) and feed it filtered positions. All mutations
//! validate first and then apply, so an error leaves the state untouched.

pub mod debounce;

pub use debounce::{ArrivalDebounce, DebounceStatus};

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

use crate::config::{NavigationConfig, PlannerConfig};
use crate::error::{NavError, Result};
use crate::geodesy::{path_length, planar_distance};
use crate::planner;
use crate::types::{FilteredPosition, GeoPoint, NavigationSession, RoutePlan, Stop, StopId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavState {
    Idle,
    Active,
}

/// Transition notifications, in the order they happened.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavEvent {
    Started {
        target: StopId,
        pending: usize,
    },
    ArrivalArmed {
        stop_id: StopId,
    },
    ArrivalCancelled {
        stop_id: StopId,
    },
    StopVisited {
        stop_id: StopId,
        next: Option<StopId>,
        manual: bool,
    },
    PlanReplaced {
        target: StopId,
        pending: usize,
    },
    Completed {
        completed: usize,
    },
    Stopped,
}

pub struct Navigator {
    config: NavigationConfig,
    state: NavState,
    stops: Vec<Stop>,
    /// Stop id -> index into `stops`
    index: HashMap<StopId, usize>,
    plan: RoutePlan,
    current_target_index: usize,
    completed_count: usize,
    pending_count: usize,
    debounce: ArrivalDebounce,
}

impl Navigator {
    pub fn new(config: NavigationConfig) -> Self {
        let debounce = ArrivalDebounce::new(config.debounce());
        Navigator {
            config,
            state: NavState::Idle,
            stops: Vec::new(),
            index: HashMap::new(),
            plan: RoutePlan::empty(),
            current_target_index: 0,
            completed_count: 0,
            pending_count: 0,
            debounce,
        }
    }

    /// Preconditions for starting a session. Stops are checked first.
    pub fn check_start(stops: &[Stop], position: Option<&FilteredPosition>) -> Result<()> {
        if stops.is_empty() {
            return Err(NavError::NoStops);
        }
        if position.is_none() {
            return Err(NavError::NoPosition);
        }
        Ok(())
    }

    /// Plan from `position` and activate in one synchronous step.
    pub fn start(
        &mut self,
        stops: Vec<Stop>,
        position: Option<&FilteredPosition>,
        planner_config: &PlannerConfig,
    ) -> Result<Vec<NavEvent>> {
        Self::check_start(&stops, position)?;
        let plan = planner::plan(position.map(|p| p.point), &stops, planner_config)?;
        self.activate(stops, plan)
    }

    /// Begin a session over `stops` following `plan`.
    ///
    /// Every stop is reset to unvisited. Calling this while active restarts
    /// the session.
    pub fn activate(&mut self, mut stops: Vec<Stop>, plan: RoutePlan) -> Result<Vec<NavEvent>> {
        if stops.is_empty() {
            return Err(NavError::NoStops);
        }
        let index = build_index(&stops)?;
        let expected: HashSet<StopId> = index.keys().copied().collect();
        check_plan_covers(&plan, &expected)?;

        if self.state == NavState::Active {
            log::info!("restarting active navigation session");
        }

        for stop in &mut stops {
            stop.reset_visited();
        }

        self.pending_count = stops.len();
        self.completed_count = 0;
        self.stops = stops;
        self.index = index;
        self.plan = plan;
        self.current_target_index = 0;
        self.debounce.disarm();
        self.state = NavState::Active;

        let target = self.plan.order[0];
        log::info!(
            "navigation started: {} ({} stops), first target {}",
            self.plan.summary(),
            self.pending_count,
            target
        );
        Ok(vec![NavEvent::Started {
            target,
            pending: self.pending_count,
        }])
    }

    /// Swap in a plan over the pending stops, e.g. after re-planning from
    /// the current position. The target becomes the plan's first entry.
    pub fn replace_plan(&mut self, plan: RoutePlan) -> Result<Vec<NavEvent>> {
        if self.state != NavState::Active {
            return Err(NavError::NotActive);
        }
        let pending: HashSet<StopId> = self
            .stops
            .iter()
            .filter(|s| !s.is_visited())
            .map(|s| s.id)
            .collect();
        check_plan_covers(&plan, &pending)?;

        self.plan = plan;
        self.current_target_index = 0;
        if let Some(stop_id) = self.debounce.disarm() {
            log::debug!("re-plan cleared pending arrival at stop {}", stop_id);
        }

        let target = self.plan.order[0];
        log::info!("plan replaced: {}, target {}", self.plan.summary(), target);
        Ok(vec![NavEvent::PlanReplaced {
            target,
            pending: self.pending_count,
        }])
    }

    /// Proximity check against the current target.
    ///
    /// Inside the arrival radius and slower than the arrival speed arms the
    /// debounce; holding that for the debounce delay commits the visit.
    /// Unknown speed counts as slow. No-op unless active.
    pub fn on_position_update(&mut self, position: &FilteredPosition, now: Instant) -> Vec<NavEvent> {
        let Some(target) = self.current_target() else {
            return Vec::new();
        };
        let target_id = target.id;

        let distance = planar_distance(position.point, target.position);
        let slow = position.speed_mps.unwrap_or(0.0) < self.config.arrival_max_speed_mps;

        if distance < self.config.arrival_radius_m && slow {
            match self.debounce.observe(target_id, now) {
                DebounceStatus::Armed => {
                    log::debug!("arrival armed at stop {} ({:.1} m)", target_id, distance);
                    vec![NavEvent::ArrivalArmed { stop_id: target_id }]
                }
                DebounceStatus::Holding => Vec::new(),
                DebounceStatus::Ready => self.visit(target_id, false),
            }
        } else {
            match self.debounce.disarm() {
                Some(stop_id) => {
                    log::debug!("arrival cancelled at stop {} ({:.1} m)", stop_id, distance);
                    vec![NavEvent::ArrivalCancelled { stop_id }]
                }
                None => Vec::new(),
            }
        }
    }

    /// Commit an armed arrival once its delay has elapsed without a
    /// contradicting position update.
    pub fn poll(&mut self, now: Instant) -> Vec<NavEvent> {
        let Some(target_id) = self.current_target().map(|s| s.id) else {
            return Vec::new();
        };
        match self.debounce.expired(now) {
            Some(stop_id) if stop_id == target_id => self.visit(stop_id, false),
            _ => Vec::new(),
        }
    }

    /// Mark any pending stop visited by hand. Re-marking is a no-op.
    pub fn mark_visited(&mut self, stop_id: StopId) -> Result<Vec<NavEvent>> {
        if self.state != NavState::Active {
            return Err(NavError::NotActive);
        }
        let idx = *self.index.get(&stop_id).ok_or(NavError::UnknownStop(stop_id))?;
        if self.stops[idx].is_visited() {
            return Ok(Vec::new());
        }
        Ok(self.visit(stop_id, true))
    }

    /// Leave the session. Valid from any state.
    pub fn stop(&mut self) -> Vec<NavEvent> {
        let was_active = self.state == NavState::Active;
        self.state = NavState::Idle;
        self.plan = RoutePlan::empty();
        self.current_target_index = 0;
        self.completed_count = 0;
        self.pending_count = 0;
        self.debounce.disarm();

        if was_active {
            log::info!("navigation stopped");
            vec![NavEvent::Stopped]
        } else {
            Vec::new()
        }
    }

    fn visit(&mut self, stop_id: StopId, manual: bool) -> Vec<NavEvent> {
        let Some(&idx) = self.index.get(&stop_id) else {
            return Vec::new();
        };
        self.stops[idx].mark_visited();
        self.completed_count += 1;
        self.pending_count = self.pending_count.saturating_sub(1);
        if self.debounce.armed_for() == Some(stop_id) {
            self.debounce.disarm();
        }

        if self.current_target().map(|s| s.id) == Some(stop_id) {
            if let Some(next_index) = self.next_unvisited_index() {
                self.current_target_index = next_index;
            }
        }

        let next = self.next_unvisited_index().map(|i| self.plan.order[i]);
        log::info!(
            "stop {} visited{} ({} done, {} pending)",
            stop_id,
            if manual { " manually" } else { "" },
            self.completed_count,
            self.pending_count
        );

        let mut events = vec![NavEvent::StopVisited {
            stop_id,
            next,
            manual,
        }];

        if next.is_none() {
            self.state = NavState::Idle;
            self.current_target_index = 0;
            self.debounce.disarm();
            log::info!("all {} stops visited", self.completed_count);
            events.push(NavEvent::Completed {
                completed: self.completed_count,
            });
        }

        events
    }

    /// First unvisited entry of the plan, walking from the start.
    fn next_unvisited_index(&self) -> Option<usize> {
        self.plan.order.iter().position(|id| {
            self.index
                .get(id)
                .map_or(false, |&idx| !self.stops[idx].is_visited())
        })
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == NavState::Active
    }

    pub fn session(&self) -> NavigationSession {
        NavigationSession {
            active: self.is_active(),
            current_target_index: self.current_target_index,
            completed_count: self.completed_count,
            pending_count: self.pending_count,
        }
    }

    /// Current target stop while active.
    pub fn current_target(&self) -> Option<&Stop> {
        if self.state != NavState::Active {
            return None;
        }
        let id = self.plan.order.get(self.current_target_index)?;
        self.index.get(id).map(|&idx| &self.stops[idx])
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn plan(&self) -> &RoutePlan {
        &self.plan
    }

    /// Unvisited stops in plan order, current target first.
    pub fn pending_in_order(&self) -> Vec<&Stop> {
        self.plan.order[self.current_target_index.min(self.plan.order.len())..]
            .iter()
            .filter_map(|id| self.index.get(id).map(|&idx| &self.stops[idx]))
            .filter(|s| !s.is_visited())
            .collect()
    }

    /// Drop entries of `plan` that were visited since it was computed.
    ///
    /// Relative order is kept and the length is recomputed from `start`.
    /// A plan that still lists only pending stops is returned unchanged.
    pub fn restrict_to_pending(&self, plan: RoutePlan, start: Option<GeoPoint>) -> RoutePlan {
        let is_pending = |id: &StopId| {
            self.index
                .get(id)
                .map_or(false, |&idx| !self.stops[idx].is_visited())
        };
        if plan.order.iter().all(is_pending) {
            return plan;
        }

        let order: Vec<StopId> = plan.order.into_iter().filter(is_pending).collect();
        let points: Vec<GeoPoint> = start
            .into_iter()
            .chain(
                order
                    .iter()
                    .filter_map(|id| self.index.get(id).map(|&idx| self.stops[idx].position)),
            )
            .collect();
        log::debug!("plan narrowed to {} pending stops", order.len());
        RoutePlan {
            total_distance_meters: path_length(&points),
            order,
        }
    }

    /// Unvisited stops in id order, for re-planning.
    pub fn pending_stops(&self) -> Vec<Stop> {
        self.stops.iter().filter(|s| !s.is_visited()).cloned().collect()
    }
}

fn build_index(stops: &[Stop]) -> Result<HashMap<StopId, usize>> {
    let mut index = HashMap::with_capacity(stops.len());
    for (i, stop) in stops.iter().enumerate() {
        stop.position.validate()?;
        if index.insert(stop.id, i).is_some() {
            return Err(NavError::InvalidInput(format!("duplicate stop id {}", stop.id)));
        }
    }
    Ok(index)
}

/// The plan must list each expected stop exactly once and nothing else.
fn check_plan_covers(plan: &RoutePlan, expected: &HashSet<StopId>) -> Result<()> {
    if plan.order.len() != expected.len() {
        return Err(NavError::InvalidInput(format!(
            "plan has {} entries for {} stops",
            plan.order.len(),
            expected.len()
        )));
    }
    let mut seen = HashSet::with_capacity(plan.order.len());
    for id in &plan.order {
        if !expected.contains(id) {
            return Err(NavError::UnknownStop(*id));
        }
        if !seen.insert(*id) {
            return Err(NavError::InvalidInput(format!("stop {} planned twice", id)));
        }
    }
    if plan.order.is_empty() {
        return Err(NavError::NoStops);
    }
    Ok(())
}
