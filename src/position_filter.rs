use std::collections::VecDeque;
use thiserror::Error;

use crate::config::FilterConfig;
use crate::geodesy::planar_distance;
use crate::smoothing::{accuracy_weight, circular_mean_degrees, recency_weights, weighted_mean, MotionState};
use crate::types::{FilteredPosition, GeoPoint, PositionSample};

/// Why a raw sample was dropped. Rejection is routine and never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("accuracy {accuracy:.1} m exceeds ceiling {ceiling:.1} m")]
    LowAccuracy { accuracy: f64, ceiling: f64 },

    #[error("jump of {distance:.1} m exceeds ceiling {ceiling:.1} m")]
    Jump { distance: f64, ceiling: f64 },

    #[error("sample at {timestamp} predates last accepted sample at {last}")]
    OutOfOrder { timestamp: i64, last: i64 },

    #[error("malformed sample: {0}")]
    Malformed(String),
}

/// Smooths the raw positioning stream into one authoritative position.
///
/// # Pipeline
/// 1. Drop samples whose accuracy radius exceeds `max_accuracy_m`
/// 2. Drop samples more than `max_jump_m` from the previous accepted sample,
///    unless `relocate_after_jumps` rejections in a row agree on a new spot;
///    then the history restarts there
/// 3. Append to a bounded history (oldest evicted)
/// 4. With enough history, weighted-average the window:
///    recency weights while moving, inverse-accuracy weights while stationary
/// 5. Circular-mean the headings in the window
///
/// A rejected sample leaves both the history and the current estimate
/// untouched. Not safe to share between tasks; the coordinator owns it.
pub struct PositionFilter {
    config: FilterConfig,
    history: VecDeque<PositionSample>,
    current: Option<FilteredPosition>,
    accepted_count: u64,
    rejected_count: u64,
    /// Last jump-rejected sample and how many agreeing rejections led to it
    jump_candidate: Option<PositionSample>,
    jump_streak: usize,
}

impl PositionFilter {
    pub fn new(config: FilterConfig) -> Self {
        let capacity = config.history_capacity.max(1);
        PositionFilter {
            config,
            history: VecDeque::with_capacity(capacity),
            current: None,
            accepted_count: 0,
            rejected_count: 0,
            jump_candidate: None,
            jump_streak: 0,
        }
    }

    /// Feed one raw sample, returning the new estimate or the reason it was dropped.
    pub fn ingest(&mut self, sample: PositionSample) -> Result<FilteredPosition, Rejection> {
        if let Err(rejection) = self.check(&sample) {
            let relocate = matches!(rejection, Rejection::Jump { .. }) && self.note_jump(&sample);
            if !relocate {
                self.rejected_count += 1;
                log::debug!("position sample rejected: {}", rejection);
                return Err(rejection);
            }
            log::warn!(
                "{} consecutive samples agree on a new location ({}), reseeding position history",
                self.jump_streak,
                rejection
            );
            self.history.clear();
        }
        self.jump_candidate = None;
        self.jump_streak = 0;

        let latest = sample.clone();
        self.history.push_back(sample);
        while self.history.len() > self.config.history_capacity.max(1) {
            self.history.pop_front();
        }

        let filtered = self.smooth(&latest);
        self.current = Some(filtered.clone());
        self.accepted_count += 1;
        Ok(filtered)
    }

    /// Track jump rejections that land close to each other. Returns true once
    /// enough of them agree that the receiver really moved.
    fn note_jump(&mut self, sample: &PositionSample) -> bool {
        let consistent = self.jump_candidate.as_ref().map_or(false, |candidate| {
            sample.timestamp_millis >= candidate.timestamp_millis
                && planar_distance(candidate.point, sample.point) <= self.config.max_jump_m
        });
        self.jump_streak = if consistent { self.jump_streak + 1 } else { 1 };
        self.jump_candidate = Some(sample.clone());

        if self.jump_streak == 1 {
            log::warn!("position jump rejected, filtered position held");
        }
        self.config.relocate_after_jumps > 0 && self.jump_streak >= self.config.relocate_after_jumps
    }

    fn check(&self, sample: &PositionSample) -> Result<(), Rejection> {
        if !sample.point.is_valid() {
            return Err(Rejection::Malformed(format!(
                "coordinate ({}, {})",
                sample.point.latitude, sample.point.longitude
            )));
        }
        if !(sample.accuracy_meters.is_finite() && sample.accuracy_meters >= 0.0) {
            return Err(Rejection::Malformed(format!(
                "accuracy {}",
                sample.accuracy_meters
            )));
        }

        if sample.accuracy_meters > self.config.max_accuracy_m {
            return Err(Rejection::LowAccuracy {
                accuracy: sample.accuracy_meters,
                ceiling: self.config.max_accuracy_m,
            });
        }

        if let Some(previous) = self.history.back() {
            if sample.timestamp_millis < previous.timestamp_millis {
                return Err(Rejection::OutOfOrder {
                    timestamp: sample.timestamp_millis,
                    last: previous.timestamp_millis,
                });
            }

            let distance = planar_distance(previous.point, sample.point);
            if distance > self.config.max_jump_m {
                return Err(Rejection::Jump {
                    distance,
                    ceiling: self.config.max_jump_m,
                });
            }
        }

        Ok(())
    }

    /// `latest` is the sample just appended to the history.
    fn smooth(&self, latest: &PositionSample) -> FilteredPosition {
        let heading_degrees = self.smoothed_heading(latest.heading_degrees);

        if self.history.len() < self.config.min_smoothing_samples {
            return FilteredPosition {
                point: latest.point,
                accuracy_meters: latest.accuracy_meters,
                heading_degrees,
                speed_mps: latest.speed_mps,
                timestamp_millis: latest.timestamp_millis,
            };
        }

        let (weights, accuracy_meters) =
            match MotionState::classify(latest.speed_mps, self.config.moving_speed_mps) {
                MotionState::Moving => (
                    recency_weights(self.history.len()),
                    // Trust the latest reading while moving
                    latest.accuracy_meters,
                ),
                MotionState::Stationary => {
                    let weights: Vec<f64> = self
                        .history
                        .iter()
                        .map(|s| accuracy_weight(s.accuracy_meters))
                        .collect();
                    let accuracy = weighted_mean(
                        self.history
                            .iter()
                            .zip(&weights)
                            .map(|(s, w)| (s.accuracy_meters, *w)),
                    )
                    .unwrap_or(latest.accuracy_meters);
                    (weights, accuracy)
                }
            };

        let latitude = weighted_mean(
            self.history
                .iter()
                .zip(&weights)
                .map(|(s, w)| (s.point.latitude, *w)),
        )
        .unwrap_or(latest.point.latitude);
        let longitude = weighted_mean(
            self.history
                .iter()
                .zip(&weights)
                .map(|(s, w)| (s.point.longitude, *w)),
        )
        .unwrap_or(latest.point.longitude);

        FilteredPosition {
            point: GeoPoint::new(latitude, longitude),
            accuracy_meters,
            heading_degrees,
            speed_mps: latest.speed_mps,
            timestamp_millis: latest.timestamp_millis,
        }
    }

    fn smoothed_heading(&self, latest_heading: Option<f64>) -> Option<f64> {
        let headings: Vec<f64> = self
            .history
            .iter()
            .filter_map(|s| s.heading_degrees)
            .filter(|h| h.is_finite())
            .collect();
        if headings.len() >= 2 {
            circular_mean_degrees(&headings)
        } else {
            latest_heading
        }
    }

    /// Last accepted estimate; held unchanged across gaps in the feed.
    pub fn current(&self) -> Option<&FilteredPosition> {
        self.current.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &PositionSample> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted_count
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected_count
    }
}
