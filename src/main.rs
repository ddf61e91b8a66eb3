use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use geo::BoundingRect;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Duration};

use delivery_nav::dashboard::start_dashboard;
use delivery_nav::{
    Coordinator, GeoPoint, NavConfig, NavEvent, OfflineOracle, OsrmClient, PositionSample,
    RoutingOracle, Stop, StopId,
};

#[derive(Parser, Debug)]
#[command(name = "delivery_nav")]
#[command(about = "Replay a recorded position feed through a delivery navigation session", long_about = None)]
struct Args {
    /// JSON array of stops: [{"id": 1, "lat": 49.5, "lon": 7.0, "note": "..."}]
    #[arg(long)]
    stops: PathBuf,

    /// Position samples, one JSON object per line
    #[arg(long)]
    samples: PathBuf,

    /// JSON configuration file (defaults for anything missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the routing service; every segment becomes a straight line
    #[arg(long)]
    offline: bool,

    /// Override routing.base_url
    #[arg(long)]
    routing_url: Option<String>,

    /// Re-plan the pending stops after every visit
    #[arg(long)]
    replan_on_visit: bool,

    /// Replay speed multiplier for the recorded sample spacing
    #[arg(long, default_value = "10.0")]
    speedup: f64,

    /// Serve the live display on this port
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Write the final display snapshot to this file
    #[arg(long)]
    snapshot_out: Option<PathBuf>,

    /// Debug logging (RUST_LOG still wins when set)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Deserialize)]
struct StopRecord {
    id: StopId,
    lat: f64,
    lon: f64,
    #[serde(default)]
    note: Option<String>,
}

fn load_stops(path: &Path) -> Result<Vec<Stop>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let records: Vec<StopRecord> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing stops from {}", path.display()))?;
    Ok(records
        .into_iter()
        .map(|r| {
            let stop = Stop::new(r.id, GeoPoint::new(r.lat, r.lon));
            match r.note {
                Some(note) => stop.with_note(note),
                None => stop,
            }
        })
        .collect())
}

fn load_samples(path: &Path) -> Result<Vec<PositionSample>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut samples = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: PositionSample = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        samples.push(sample);
    }
    Ok(samples)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if !(args.speedup.is_finite() && args.speedup > 0.0) {
        bail!("--speedup must be positive, got {}", args.speedup);
    }

    let mut config = match &args.config {
        Some(path) => NavConfig::load(path)?,
        None => NavConfig::default(),
    };
    if let Some(url) = &args.routing_url {
        config.routing.base_url = url.clone();
    }
    if args.replan_on_visit {
        config.navigation.replan_on_visit = true;
    }
    config.validate()?;

    let stops = load_stops(&args.stops)?;
    let samples = load_samples(&args.samples)?;

    println!("[{}] Delivery navigation replay", ts_now());
    println!("  Stops: {}", stops.len());
    println!("  Samples: {}", samples.len());
    println!("  Speedup: {}x", args.speedup);
    if args.offline {
        println!("  Routing: offline (straight lines)");
    } else {
        println!("  Routing: {} ({})", config.routing.base_url, config.routing.profile);
    }

    if args.offline {
        replay(&args, config, stops, samples, Arc::new(OfflineOracle)).await
    } else {
        let oracle = Arc::new(OsrmClient::new(&config.routing));
        replay(&args, config, stops, samples, oracle).await
    }
}

async fn replay<O: RoutingOracle>(
    args: &Args,
    config: NavConfig,
    stops: Vec<Stop>,
    samples: Vec<PositionSample>,
    oracle: Arc<O>,
) -> Result<()> {
    let (handle, task) = Coordinator::spawn(config, oracle);

    let mut events = handle.subscribe_events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => log::warn!("event log skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Some(port) = args.dashboard_port {
        let snapshots = handle.subscribe_snapshot();
        tokio::spawn(async move {
            if let Err(e) = start_dashboard(snapshots, port).await {
                log::error!("dashboard failed: {}", e);
            }
        });
    }

    let position = handle.subscribe_position();
    let mut started = false;
    let mut previous_ts: Option<i64> = None;

    for sample in samples {
        if let Some(previous) = previous_ts {
            let gap_ms = (sample.timestamp_millis - previous).max(0) as f64 / args.speedup;
            sleep(Duration::from_secs_f64(gap_ms / 1000.0)).await;
        }
        previous_ts = Some(sample.timestamp_millis);
        handle.push_sample(sample).await?;

        if !started {
            // Navigation needs a filtered position first
            handle.flush().await?;
            if position.borrow().is_some() {
                let plan = handle.start(stops.clone()).await?;
                println!("[{}] Plan: {:?} ({})", ts_now(), plan.order, plan.summary());
                started = true;
            }
        } else if !handle.snapshot().session.active {
            println!("[{}] Session finished, ending replay", ts_now());
            break;
        }
    }

    handle.flush().await?;
    let snapshot = handle.snapshot();

    if let Some(path) = &args.snapshot_out {
        snapshot
            .save(path)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
        println!("[{}] Snapshot written to {}", ts_now(), path.display());
    }

    println!("\n=== Final Stats ===");
    println!("Plan: {}", snapshot.summary);
    println!(
        "Visited: {} | Pending: {}",
        snapshot.session.completed_count, snapshot.session.pending_count
    );
    println!(
        "Samples: {} accepted, {} rejected",
        snapshot.filter.accepted, snapshot.filter.rejected
    );
    if let Some(route) = &snapshot.route {
        println!(
            "Route: {:.2} km, {:.0} min, {} points, {} straight-line segments",
            route.total_distance_meters / 1000.0,
            route.total_duration_seconds / 60.0,
            route.polyline.len(),
            route.fallback_segment_count()
        );
        if let Some(rect) = route.to_line_string().bounding_rect() {
            println!(
                "Route bounds: ({:.5}, {:.5}) - ({:.5}, {:.5})",
                rect.min().y,
                rect.min().x,
                rect.max().y,
                rect.max().x
            );
        }
    }

    handle.stop().await?;
    handle.shutdown().await?;
    drop(handle);
    task.await?;
    event_log.await?;

    Ok(())
}

fn print_event(event: &NavEvent) {
    match event {
        NavEvent::Started { target, pending } => {
            println!("[{}] Navigation started: target {}, {} pending", ts_now(), target, pending)
        }
        NavEvent::ArrivalArmed { stop_id } => println!("[{}] Near stop {}", ts_now(), stop_id),
        NavEvent::ArrivalCancelled { stop_id } => println!("[{}] Left stop {}", ts_now(), stop_id),
        NavEvent::StopVisited { stop_id, next, manual } => println!(
            "[{}] Stop {} visited{}, next {:?}",
            ts_now(),
            stop_id,
            if *manual { " (manual)" } else { "" },
            next
        ),
        NavEvent::PlanReplaced { target, pending } => {
            println!("[{}] Re-planned: target {}, {} pending", ts_now(), target, pending)
        }
        NavEvent::Completed { completed } => {
            println!("[{}] All {} stops delivered", ts_now(), completed)
        }
        NavEvent::Stopped => println!("[{}] Navigation stopped", ts_now()),
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
