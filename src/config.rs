//! Runtime configuration.
//!
//! Loaded from a single JSON file; every field is optional and falls back to
//! the defaults below. Thresholds vary between deployments, so none of them
//! are hard-coded elsewhere.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{NavError, Result};

mod defaults {
    pub fn history_capacity() -> usize {
        8
    }
    pub fn max_accuracy_m() -> f64 {
        50.0
    }
    pub fn max_jump_m() -> f64 {
        150.0
    }
    pub fn moving_speed_mps() -> f64 {
        0.8
    }
    pub fn min_smoothing_samples() -> usize {
        3
    }
    pub fn relocate_after_jumps() -> usize {
        3
    }
    pub fn two_opt_max_iterations() -> usize {
        100
    }
    pub fn arrival_radius_m() -> f64 {
        30.0
    }
    pub fn arrival_max_speed_mps() -> f64 {
        1.0
    }
    pub fn arrival_debounce_ms() -> u64 {
        1000
    }
    pub fn base_url() -> String {
        "https://router.project-osrm.org".to_string()
    }
    pub fn profile() -> String {
        "driving".to_string()
    }
    pub fn segment_timeout_ms() -> u64 {
        10_000
    }
    pub fn inter_request_pause_ms() -> u64 {
        1000
    }
    pub fn fallback_speed_mps() -> f64 {
        8.33
    }
    pub fn user_agent() -> String {
        "delivery_nav/0.1.0".to_string()
    }
    pub fn silence_threshold_secs() -> u64 {
        30
    }
    pub fn check_interval_secs() -> u64 {
        2
    }
}

/// Position filter settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Accepted samples kept for smoothing
    #[serde(default = "defaults::history_capacity")]
    pub history_capacity: usize,

    /// Samples reporting a worse accuracy radius are dropped (meters)
    #[serde(default = "defaults::max_accuracy_m")]
    pub max_accuracy_m: f64,

    /// Larger jumps from the previous accepted sample are outliers (meters)
    #[serde(default = "defaults::max_jump_m")]
    pub max_jump_m: f64,

    /// Speed above which the driver counts as moving (m/s)
    #[serde(default = "defaults::moving_speed_mps")]
    pub moving_speed_mps: f64,

    /// History length required before smoothing kicks in
    #[serde(default = "defaults::min_smoothing_samples")]
    pub min_smoothing_samples: usize,

    /// Consecutive jump rejections that agree with each other before the
    /// history is reseeded at the new location. 0 never reseeds.
    #[serde(default = "defaults::relocate_after_jumps")]
    pub relocate_after_jumps: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            history_capacity: defaults::history_capacity(),
            max_accuracy_m: defaults::max_accuracy_m(),
            max_jump_m: defaults::max_jump_m(),
            moving_speed_mps: defaults::moving_speed_mps(),
            min_smoothing_samples: defaults::min_smoothing_samples(),
            relocate_after_jumps: defaults::relocate_after_jumps(),
        }
    }
}

/// Route planner settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Upper bound on 2-opt scans
    #[serde(default = "defaults::two_opt_max_iterations")]
    pub two_opt_max_iterations: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            two_opt_max_iterations: defaults::two_opt_max_iterations(),
        }
    }
}

/// Arrival detection settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "defaults::arrival_radius_m")]
    pub arrival_radius_m: f64,

    /// Passing a stop faster than this never counts as a visit (m/s)
    #[serde(default = "defaults::arrival_max_speed_mps")]
    pub arrival_max_speed_mps: f64,

    /// How long the arrival condition must hold before committing
    #[serde(default = "defaults::arrival_debounce_ms")]
    pub arrival_debounce_ms: u64,

    /// Re-plan pending stops from the filtered position after every visit
    #[serde(default)]
    pub replan_on_visit: bool,
}

impl NavigationConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.arrival_debounce_ms)
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            arrival_radius_m: defaults::arrival_radius_m(),
            arrival_max_speed_mps: defaults::arrival_max_speed_mps(),
            arrival_debounce_ms: defaults::arrival_debounce_ms(),
            replan_on_visit: false,
        }
    }
}

/// Which part of the plan gets a road path
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StitchScope {
    /// Current position to the current target only
    #[default]
    NextTarget,
    /// Current position through every pending stop
    FullRoute,
}

/// Routing oracle settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    #[serde(default = "defaults::profile")]
    pub profile: String,

    #[serde(default = "defaults::segment_timeout_ms")]
    pub segment_timeout_ms: u64,

    /// Pause between consecutive segment requests
    #[serde(default = "defaults::inter_request_pause_ms")]
    pub inter_request_pause_ms: u64,

    /// Speed used to estimate straight-line segment durations (m/s)
    #[serde(default = "defaults::fallback_speed_mps")]
    pub fallback_speed_mps: f64,

    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub stitch_scope: StitchScope,
}

impl RoutingConfig {
    pub fn segment_timeout(&self) -> Duration {
        Duration::from_millis(self.segment_timeout_ms)
    }

    pub fn inter_request_pause(&self) -> Duration {
        Duration::from_millis(self.inter_request_pause_ms)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            profile: defaults::profile(),
            segment_timeout_ms: defaults::segment_timeout_ms(),
            inter_request_pause_ms: defaults::inter_request_pause_ms(),
            fallback_speed_mps: defaults::fallback_speed_mps(),
            user_agent: defaults::user_agent(),
            stitch_scope: StitchScope::default(),
        }
    }
}

/// Positioning feed monitor settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "defaults::silence_threshold_secs")]
    pub silence_threshold_secs: u64,

    #[serde(default = "defaults::check_interval_secs")]
    pub check_interval_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            silence_threshold_secs: defaults::silence_threshold_secs(),
            check_interval_secs: defaults::check_interval_secs(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NavConfig {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

impl NavConfig {
    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            NavError::InvalidInput(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: NavConfig = serde_json::from_str(text)
            .map_err(|e| NavError::InvalidInput(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("filter.max_accuracy_m", self.filter.max_accuracy_m),
            ("filter.max_jump_m", self.filter.max_jump_m),
            ("navigation.arrival_radius_m", self.navigation.arrival_radius_m),
            ("navigation.arrival_max_speed_mps", self.navigation.arrival_max_speed_mps),
            ("routing.fallback_speed_mps", self.routing.fallback_speed_mps),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(NavError::InvalidInput(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.filter.history_capacity == 0 {
            return Err(NavError::InvalidInput(
                "filter.history_capacity must be at least 1".to_string(),
            ));
        }
        if self.feed.check_interval_secs == 0 {
            return Err(NavError::InvalidInput(
                "feed.check_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
