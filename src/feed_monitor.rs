use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::config::FeedConfig;

/// Health of the raw positioning feed
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FeedStatus {
    pub healthy: bool,
    pub silence_secs: f64,
    pub samples_received: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FeedTransition {
    WentSilent { silence: Duration },
    Recovered { after: Duration },
}

/// Tracks time since the last raw sample.
///
/// The feed counts as silent once no sample has arrived for the threshold.
/// Each silence is reported once; the next sample reports recovery. The
/// coordinator keeps the last filtered position meanwhile.
#[derive(Clone, Debug)]
pub struct FeedMonitor {
    last_sample: Instant,
    silence_threshold: Duration,
    check_interval: Duration,
    silent: bool,
    samples_received: u64,
}

impl FeedMonitor {
    pub fn new(config: &FeedConfig, now: Instant) -> Self {
        FeedMonitor {
            last_sample: now,
            silence_threshold: Duration::from_secs(config.silence_threshold_secs),
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
            silent: false,
            samples_received: 0,
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn record_sample(&mut self, now: Instant) -> Option<FeedTransition> {
        let gap = now.saturating_duration_since(self.last_sample);
        self.last_sample = now;
        self.samples_received += 1;

        if self.silent {
            self.silent = false;
            log::info!("positioning feed recovered after {:.1}s", gap.as_secs_f64());
            return Some(FeedTransition::Recovered { after: gap });
        }
        None
    }

    pub fn check(&mut self, now: Instant) -> Option<FeedTransition> {
        let silence = now.saturating_duration_since(self.last_sample);
        if !self.silent && silence > self.silence_threshold {
            self.silent = true;
            log::warn!(
                "positioning feed silent for {:.1}s, holding last position",
                silence.as_secs_f64()
            );
            return Some(FeedTransition::WentSilent { silence });
        }
        None
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn status(&self, now: Instant) -> FeedStatus {
        FeedStatus {
            healthy: !self.silent,
            silence_secs: now.saturating_duration_since(self.last_sample).as_secs_f64(),
            samples_received: self.samples_received,
        }
    }
}
