use std::time::Duration;
use tokio::time::Instant;

use crate::types::StopId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebounceStatus {
    /// Condition just started holding
    Armed,
    /// Still holding, delay not yet elapsed
    Holding,
    /// Held for the full delay
    Ready,
}

/// Tracks how long the arrival condition has held for one stop.
#[derive(Clone, Debug)]
pub struct ArrivalDebounce {
    delay: Duration,
    armed: Option<(StopId, Instant)>,
}

impl ArrivalDebounce {
    pub fn new(delay: Duration) -> Self {
        ArrivalDebounce { delay, armed: None }
    }

    /// Record that the condition holds for `stop_id` at `now`.
    ///
    /// Switching to a different stop re-arms from `now`.
    pub fn observe(&mut self, stop_id: StopId, now: Instant) -> DebounceStatus {
        match self.armed {
            Some((armed_id, since)) if armed_id == stop_id => {
                if now.saturating_duration_since(since) >= self.delay {
                    DebounceStatus::Ready
                } else {
                    DebounceStatus::Holding
                }
            }
            _ => {
                self.armed = Some((stop_id, now));
                if self.delay.is_zero() {
                    DebounceStatus::Ready
                } else {
                    DebounceStatus::Armed
                }
            }
        }
    }

    /// Stop whose delay has elapsed by `now`, if any.
    pub fn expired(&self, now: Instant) -> Option<StopId> {
        self.armed
            .filter(|(_, since)| now.saturating_duration_since(*since) >= self.delay)
            .map(|(id, _)| id)
    }

    /// Clear the tracker, returning the stop it was armed for.
    pub fn disarm(&mut self) -> Option<StopId> {
        self.armed.take().map(|(id, _)| id)
    }

    pub fn armed_for(&self) -> Option<StopId> {
        self.armed.map(|(id, _)| id)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
