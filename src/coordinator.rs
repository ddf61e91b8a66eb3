//! Session owner.
//!
//! One task owns the position filter, the navigator and the drawn route, and
//! handles commands strictly in arrival order. Planning runs on the blocking
//! pool over a snapshot of the inputs; stitching runs in its own task. Both
//! report back through an internal channel tagged with a generation number,
//! and results from a superseded generation are dropped.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{NavConfig, StitchScope};
use crate::error::{NavError, Result};
use crate::feed_monitor::FeedMonitor;
use crate::navigation::{NavEvent, Navigator};
use crate::planner;
use crate::position_filter::PositionFilter;
use crate::routing::{RoutingOracle, StitchedRoute, Stitcher};
use crate::snapshot::{DisplaySnapshot, FilterStats, TargetInfo};
use crate::types::{FilteredPosition, GeoPoint, PositionSample, RoutePlan, Stop, StopId};

const COMMAND_QUEUE: usize = 256;
const EVENT_BUFFER: usize = 64;
const MIN_TICK: Duration = Duration::from_millis(10);

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Sample(PositionSample),
    Start { stops: Vec<Stop>, reply: Reply<RoutePlan> },
    Stop,
    Replan { reply: Reply<RoutePlan> },
    MarkVisited { stop_id: StopId, reply: Reply<()> },
    /// Answered once every earlier command has been handled
    Flush { reply: oneshot::Sender<()> },
    Shutdown,
}

enum Internal {
    PlanDone {
        generation: u64,
        result: Result<RoutePlan>,
    },
    StitchDone {
        generation: u64,
        result: Result<StitchedRoute>,
    },
}

enum PlanPurpose {
    Start { stops: Vec<Stop>, reply: Reply<RoutePlan> },
    Replan {
        start: Option<GeoPoint>,
        reply: Option<Reply<RoutePlan>>,
    },
}

struct PendingPlan {
    generation: u64,
    purpose: PlanPurpose,
}

impl PendingPlan {
    fn reject(self, error: NavError) {
        match self.purpose {
            PlanPurpose::Start { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            PlanPurpose::Replan { reply: Some(reply), .. } => {
                let _ = reply.send(Err(error));
            }
            PlanPurpose::Replan { reply: None, .. } => {}
        }
    }
}

fn stopped() -> NavError {
    NavError::Internal("coordinator stopped".to_string())
}

/// Cloneable front end to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    position: watch::Receiver<Option<FilteredPosition>>,
    snapshot: watch::Receiver<DisplaySnapshot>,
    events: broadcast::Sender<NavEvent>,
}

impl CoordinatorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| stopped())
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn push_sample(&self, sample: PositionSample) -> Result<()> {
        self.send(Command::Sample(sample)).await
    }

    /// Plan `stops` from the current filtered position and start navigating.
    pub async fn start(&self, stops: Vec<Stop>) -> Result<RoutePlan> {
        self.request(|reply| Command::Start { stops, reply }).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// Re-plan the pending stops from the current filtered position.
    pub async fn replan(&self) -> Result<RoutePlan> {
        self.request(|reply| Command::Replan { reply }).await
    }

    pub async fn mark_visited(&self, stop_id: StopId) -> Result<()> {
        self.request(|reply| Command::MarkVisited { stop_id, reply }).await
    }

    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush { reply: tx }).await?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    pub fn subscribe_position(&self) -> watch::Receiver<Option<FilteredPosition>> {
        self.position.clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<DisplaySnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NavEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        self.snapshot.borrow().clone()
    }
}

pub struct Coordinator<O> {
    config: NavConfig,
    filter: PositionFilter,
    navigator: Navigator,
    feed: FeedMonitor,
    stitcher: Stitcher<O>,
    route: Option<StitchedRoute>,

    plan_generation: u64,
    pending_plan: Option<PendingPlan>,
    stitch_generation: u64,
    stitch_cancel: Option<CancellationToken>,

    internal_tx: mpsc::UnboundedSender<Internal>,
    position_tx: watch::Sender<Option<FilteredPosition>>,
    snapshot_tx: watch::Sender<DisplaySnapshot>,
    events_tx: broadcast::Sender<NavEvent>,
}

impl<O: RoutingOracle> Coordinator<O> {
    /// Start the coordinator task on the current runtime.
    pub fn spawn(config: NavConfig, oracle: Arc<O>) -> (CoordinatorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (position_tx, position_rx) = watch::channel(None);
        let (snapshot_tx, snapshot_rx) = watch::channel(DisplaySnapshot::new());
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let coordinator = Coordinator {
            filter: PositionFilter::new(config.filter.clone()),
            navigator: Navigator::new(config.navigation.clone()),
            feed: FeedMonitor::new(&config.feed, Instant::now()),
            stitcher: Stitcher::new(oracle, config.routing.clone()),
            route: None,
            plan_generation: 0,
            pending_plan: None,
            stitch_generation: 0,
            stitch_cancel: None,
            internal_tx,
            position_tx,
            snapshot_tx,
            events_tx: events_tx.clone(),
            config,
        };

        let handle = CoordinatorHandle {
            commands: commands_tx,
            position: position_rx,
            snapshot: snapshot_rx,
            events: events_tx,
        };

        let task = tokio::spawn(coordinator.run(commands_rx, internal_rx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut arrival_tick = interval((self.config.navigation.debounce() / 4).max(MIN_TICK));
        arrival_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut feed_tick = interval(self.feed.check_interval());
        feed_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!("coordinator started");

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command),
                },
                Some(message) = internal.recv() => self.handle_internal(message),
                _ = arrival_tick.tick() => {
                    let events = self.navigator.poll(Instant::now());
                    if !events.is_empty() {
                        self.apply_events(events);
                        self.publish();
                    }
                }
                _ = feed_tick.tick() => {
                    if self.feed.check(Instant::now()).is_some() {
                        self.publish();
                    }
                }
            }
        }

        self.cancel_stitch();
        if let Some(pending) = self.pending_plan.take() {
            pending.reject(NavError::Cancelled);
        }
        log::info!("coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Sample(sample) => self.on_sample(sample),
            Command::Start { stops, reply } => self.on_start(stops, reply),
            Command::Stop => self.on_stop(),
            Command::Replan { reply } => self.request_replan(Some(reply)),
            Command::MarkVisited { stop_id, reply } => {
                let result = match self.navigator.mark_visited(stop_id) {
                    Ok(events) => {
                        self.apply_events(events);
                        self.publish();
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::PlanDone { generation, result } => self.on_plan_done(generation, result),
            Internal::StitchDone { generation, result } => self.on_stitch_done(generation, result),
        }
    }

    fn on_sample(&mut self, sample: PositionSample) {
        let now = Instant::now();
        self.feed.record_sample(now);

        // Rejections are logged by the filter and otherwise ignored
        if let Ok(filtered) = self.filter.ingest(sample) {
            self.position_tx.send_replace(Some(filtered.clone()));
            let events = self.navigator.on_position_update(&filtered, now);
            self.apply_events(events);
        }
        self.publish();
    }

    fn on_start(&mut self, stops: Vec<Stop>, reply: Reply<RoutePlan>) {
        if let Err(e) = Navigator::check_start(&stops, self.filter.current()) {
            log::warn!("cannot start navigation: {}", e);
            let _ = reply.send(Err(e));
            return;
        }
        let start = self.filter.current().map(|p| p.point);
        self.spawn_plan(start, stops.clone(), PlanPurpose::Start { stops, reply });
    }

    fn on_stop(&mut self) {
        if let Some(pending) = self.pending_plan.take() {
            pending.reject(NavError::Cancelled);
        }
        self.cancel_stitch();
        self.route = None;
        let events = self.navigator.stop();
        self.apply_events(events);
        self.publish();
    }

    fn request_replan(&mut self, reply: Option<Reply<RoutePlan>>) {
        let precondition = if !self.navigator.is_active() {
            Err(NavError::NotActive)
        } else if self.filter.current().is_none() {
            Err(NavError::NoPosition)
        } else {
            Ok(())
        };
        if let Err(e) = precondition {
            if let Some(reply) = reply {
                let _ = reply.send(Err(e));
            }
            return;
        }

        let start = self.filter.current().map(|p| p.point);
        let pending = self.navigator.pending_stops();
        self.spawn_plan(start, pending, PlanPurpose::Replan { start, reply });
    }

    fn spawn_plan(&mut self, start: Option<GeoPoint>, stops: Vec<Stop>, purpose: PlanPurpose) {
        self.plan_generation += 1;
        let generation = self.plan_generation;
        if let Some(previous) = self.pending_plan.replace(PendingPlan { generation, purpose }) {
            log::info!("plan request {} superseded", previous.generation);
            previous.reject(NavError::Superseded);
        }

        let config = self.config.planner.clone();
        let tx = self.internal_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = planner::plan(start, &stops, &config);
            let _ = tx.send(Internal::PlanDone { generation, result });
        });
    }

    fn on_plan_done(&mut self, generation: u64, result: Result<RoutePlan>) {
        let pending = match self.pending_plan.take() {
            Some(pending) if pending.generation == generation => pending,
            other => {
                self.pending_plan = other;
                log::debug!("discarding stale plan {}", generation);
                return;
            }
        };

        let (reply, response) = match pending.purpose {
            PlanPurpose::Start { stops, reply } => {
                let outcome = result.and_then(|plan| {
                    let events = self.navigator.activate(stops, plan.clone())?;
                    self.route = None;
                    Ok((plan, events))
                });
                (Some(reply), outcome)
            }
            PlanPurpose::Replan { start, reply } => {
                let outcome = result.and_then(|plan| {
                    // Visits may have landed while planning ran
                    let plan = self.navigator.restrict_to_pending(plan, start);
                    let events = self.navigator.replace_plan(plan.clone())?;
                    Ok((plan, events))
                });
                (reply, outcome)
            }
        };

        let response = match response {
            Ok((plan, events)) => {
                self.apply_events(events);
                self.restitch();
                self.publish();
                Ok(plan)
            }
            Err(e) => {
                log::warn!("planning request {} failed: {}", generation, e);
                Err(e)
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(response);
        }
    }

    /// Broadcast events and react to progress.
    fn apply_events(&mut self, events: Vec<NavEvent>) {
        let mut advanced = false;
        let mut completed = false;
        for event in events {
            match event {
                NavEvent::StopVisited { .. } => advanced = true,
                NavEvent::Completed { .. } => completed = true,
                _ => {}
            }
            // No subscribers is fine
            let _ = self.events_tx.send(event);
        }

        if completed {
            self.cancel_stitch();
            self.route = None;
        } else if advanced {
            if self.config.navigation.replan_on_visit {
                self.request_replan(None);
            } else {
                self.restitch();
            }
        }
    }

    fn cancel_stitch(&mut self) {
        self.stitch_generation += 1;
        if let Some(token) = self.stitch_cancel.take() {
            token.cancel();
        }
    }

    fn restitch(&mut self) {
        self.cancel_stitch();

        let Some(start) = self.filter.current().map(|p| p.point) else {
            return;
        };
        let waypoints: Vec<GeoPoint> = match self.config.routing.stitch_scope {
            StitchScope::NextTarget => self
                .navigator
                .current_target()
                .map(|s| s.position)
                .into_iter()
                .collect(),
            StitchScope::FullRoute => self
                .navigator
                .pending_in_order()
                .iter()
                .map(|s| s.position)
                .collect(),
        };
        if waypoints.is_empty() {
            return;
        }

        let generation = self.stitch_generation;
        let token = CancellationToken::new();
        self.stitch_cancel = Some(token.clone());
        let stitcher = self.stitcher.clone();
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = stitcher.stitch(start, &waypoints, &token).await;
            if !token.is_cancelled() {
                let _ = tx.send(Internal::StitchDone { generation, result });
            }
        });
    }

    fn on_stitch_done(&mut self, generation: u64, result: Result<StitchedRoute>) {
        if generation != self.stitch_generation {
            log::debug!("discarding stale stitch {}", generation);
            return;
        }
        self.stitch_cancel = None;
        match result {
            Ok(route) => {
                self.route = Some(route);
                self.publish();
            }
            Err(e) => log::warn!("stitch failed: {}", e),
        }
    }

    fn publish(&self) {
        let filtered = self.filter.current().cloned();
        let target = match (filtered.as_ref(), self.navigator.current_target()) {
            (Some(position), Some(stop)) => Some(TargetInfo::between(position, stop)),
            _ => None,
        };
        let plan = self.navigator.plan().clone();

        let snapshot = DisplaySnapshot {
            generated_at: chrono::Utc::now().to_rfc3339(),
            filtered,
            session: self.navigator.session(),
            summary: plan.summary(),
            plan,
            target,
            route_approximate: self.route.as_ref().map_or(false, |r| r.fallback),
            route: self.route.clone(),
            stops: self.navigator.stops().to_vec(),
            feed: self.feed.status(Instant::now()),
            filter: FilterStats {
                accepted: self.filter.accepted_count(),
                rejected: self.filter.rejected_count(),
            },
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoutingError;
    use crate::geodesy::METERS_PER_DEGREE;
    use crate::routing::{OfflineOracle, RouteLeg};

    const BASE: GeoPoint = GeoPoint::new(49.5, 7.0);

    struct HangingOracle;

    impl RoutingOracle for HangingOracle {
        async fn route(&self, _from: GeoPoint, _to: GeoPoint) -> std::result::Result<RouteLeg, RoutingError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(RoutingError::NoRoute)
        }
    }

    fn north_of(p: GeoPoint, meters: f64) -> GeoPoint {
        GeoPoint::new(p.latitude + meters / METERS_PER_DEGREE, p.longitude)
    }

    /// Stop 1 at the base, stops 2 and 3 roughly 1 and 2 km east
    fn stops() -> Vec<Stop> {
        vec![
            Stop::new(1, BASE),
            Stop::new(2, GeoPoint::new(49.5, 7.014)),
            Stop::new(3, GeoPoint::new(49.5, 7.028)),
        ]
    }

    fn sample(point: GeoPoint, t: i64, speed: f64) -> PositionSample {
        PositionSample::new(point, 5.0, t).with_speed(speed)
    }

    fn test_config() -> NavConfig {
        let mut config = NavConfig::default();
        config.routing.inter_request_pause_ms = 10;
        config
    }

    async fn wait_for_snapshot(
        handle: &CoordinatorHandle,
        condition: impl FnMut(&DisplaySnapshot) -> bool,
    ) -> DisplaySnapshot {
        let mut rx = handle.subscribe_snapshot();
        let snapshot = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(condition))
            .await
            .expect("snapshot condition not reached")
            .expect("coordinator gone");
        snapshot.clone()
    }

    async fn started(config: NavConfig) -> CoordinatorHandle {
        let (handle, _task) = Coordinator::spawn(config, Arc::new(OfflineOracle));
        handle.push_sample(sample(north_of(BASE, 40.0), 0, 0.0)).await.unwrap();
        let plan = handle.start(stops()).await.unwrap();
        assert_eq!(plan.order, vec![1, 2, 3]);
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_preconditions() {
        let (handle, _task) = Coordinator::spawn(test_config(), Arc::new(OfflineOracle));
        assert_eq!(handle.start(stops()).await, Err(NavError::NoPosition));

        handle.push_sample(sample(BASE, 0, 0.0)).await.unwrap();
        let err = handle.start(Vec::new()).await.unwrap_err();
        assert_eq!(err, NavError::NoStops);
        assert!(!handle.snapshot().session.active);
        assert_eq!(handle.replan().await, Err(NavError::NotActive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_session_draws_fallback_route() {
        let handle = started(test_config()).await;
        let snapshot = wait_for_snapshot(&handle, |s| s.route.is_some()).await;

        assert!(snapshot.session.active);
        assert!(snapshot.route_approximate);
        let route = snapshot.route.unwrap();
        assert_eq!(route.polyline, vec![north_of(BASE, 40.0), BASE]);
        assert_eq!(snapshot.target.unwrap().stop_id, 1);
        assert_eq!(snapshot.summary.stop_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_route_scope_stitches_every_pending_stop() {
        let mut config = test_config();
        config.routing.stitch_scope = StitchScope::FullRoute;
        let handle = started(config).await;
        let snapshot = wait_for_snapshot(&handle, |s| s.route.is_some()).await;
        let route = snapshot.route.unwrap();
        assert_eq!(route.segments.len(), 3);
        assert_eq!(route.polyline.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_arrival_advances_target() {
        let handle = started(test_config()).await;
        let mut events = handle.subscribe_events();

        let near = north_of(BASE, 10.0);
        for i in 1..=3 {
            handle.push_sample(sample(near, i * 1000, 0.3)).await.unwrap();
        }
        handle.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let visited = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match events.recv().await {
                    Ok(NavEvent::StopVisited { stop_id, next, .. }) => return (stop_id, next),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(visited, (1, Some(2)));

        let snapshot = wait_for_snapshot(&handle, |s| s.session.completed_count == 1).await;
        assert_eq!(snapshot.session.current_target_index, 1);
        assert_eq!(snapshot.session.pending_count, 2);
        assert_eq!(snapshot.target.unwrap().stop_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_stitch() {
        let (handle, _task) = Coordinator::spawn(test_config(), Arc::new(HangingOracle));
        handle.push_sample(sample(BASE, 0, 0.0)).await.unwrap();
        handle.start(stops()).await.unwrap();

        handle.stop().await.unwrap();
        handle.flush().await.unwrap();
        // Well past the segment timeout
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.flush().await.unwrap();

        let snapshot = handle.snapshot();
        assert!(!snapshot.session.active);
        assert!(snapshot.route.is_none());
        assert!(snapshot.plan.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_visits_complete_session() {
        let handle = started(test_config()).await;
        let mut events = handle.subscribe_events();
        for id in [1, 2, 3] {
            handle.mark_visited(id).await.unwrap();
        }
        assert_eq!(handle.mark_visited(1).await, Err(NavError::NotActive));

        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            if event == (NavEvent::Completed { completed: 3 }) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);

        let snapshot = handle.snapshot();
        assert!(!snapshot.session.active);
        assert_eq!(snapshot.session.completed_count, 3);
        assert!(snapshot.stops.iter().all(|s| s.is_visited()));
        assert!(snapshot.route.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replan_covers_pending_stops() {
        let handle = started(test_config()).await;
        handle.mark_visited(1).await.unwrap();

        let plan = handle.replan().await.unwrap();
        assert_eq!(plan.order, vec![2, 3]);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.session.current_target_index, 0);
        assert_eq!(snapshot.session.pending_count, 2);
        assert_eq!(snapshot.plan.order, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visit_during_replan_narrows_new_plan() {
        let handle = started(test_config()).await;

        let (replan, visit) = tokio::join!(handle.replan(), handle.mark_visited(1));
        visit.unwrap();
        assert_eq!(replan.unwrap().order, vec![2, 3]);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.plan.order, vec![2, 3]);
        assert_eq!(snapshot.session.current_target_index, 0);
        assert_eq!(snapshot.session.completed_count, 1);
        assert_eq!(snapshot.target.unwrap().stop_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_start_supersedes_pending_plan() {
        let (handle, _task) = Coordinator::spawn(test_config(), Arc::new(OfflineOracle));
        handle.push_sample(sample(BASE, 0, 0.0)).await.unwrap();
        let target = north_of(BASE, 100.0);

        let (first, second) = tokio::join!(
            handle.start(stops()),
            handle.start(vec![Stop::new(7, target)])
        );
        assert_eq!(first, Err(NavError::Superseded));
        assert_eq!(second.unwrap().order, vec![7]);

        let snapshot = wait_for_snapshot(&handle, |s| s.route.is_some()).await;
        assert_eq!(snapshot.stops.len(), 1);
        assert_eq!(snapshot.route.unwrap().polyline, vec![BASE, target]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_plan() {
        let (handle, _task) = Coordinator::spawn(test_config(), Arc::new(OfflineOracle));
        handle.push_sample(sample(BASE, 0, 0.0)).await.unwrap();

        let (start, stop) = tokio::join!(handle.start(stops()), handle.stop());
        stop.unwrap();
        assert_eq!(start, Err(NavError::Cancelled));

        // The abandoned plan still finishes in the background
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.flush().await.unwrap();
        let snapshot = handle.snapshot();
        assert!(!snapshot.session.active);
        assert!(snapshot.plan.is_empty());
        assert!(snapshot.route.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_while_stitch_hangs_draws_new_route_only() {
        let (handle, _task) = Coordinator::spawn(test_config(), Arc::new(HangingOracle));
        let origin = north_of(BASE, 40.0);
        handle.push_sample(sample(origin, 0, 0.0)).await.unwrap();
        handle.start(stops()).await.unwrap();

        let target = north_of(BASE, 100.0);
        handle.start(vec![Stop::new(7, target)]).await.unwrap();

        // Past the segment timeout, so the new stitch falls back
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.flush().await.unwrap();

        let route = handle.snapshot().route.expect("route drawn");
        assert_eq!(route.polyline, vec![origin, target]);
        assert_eq!(route.segments.len(), 1);
        assert_eq!(route.segments[0].error, Some(RoutingError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_samples_hold_position() {
        let (handle, _task) = Coordinator::spawn(test_config(), Arc::new(OfflineOracle));
        let position = handle.subscribe_position();

        handle.push_sample(sample(BASE, 0, 0.0)).await.unwrap();
        handle
            .push_sample(PositionSample::new(north_of(BASE, 5.0), 500.0, 1000))
            .await
            .unwrap();
        handle.push_sample(sample(north_of(BASE, 900.0), 2000, 0.0)).await.unwrap();
        handle.flush().await.unwrap();

        assert_eq!(position.borrow().as_ref().unwrap().point, BASE);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.filter.accepted, 1);
        assert_eq!(snapshot.filter.rejected, 2);
        assert_eq!(snapshot.feed.samples_received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_task() {
        let (handle, task) = Coordinator::spawn(test_config(), Arc::new(OfflineOracle));
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.flush().await.is_err());
    }
}
