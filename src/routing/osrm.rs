use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{polyline, RouteLeg, RoutingOracle};
use crate::config::RoutingConfig;
use crate::error::RoutingError;
use crate::types::GeoPoint;

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: String,
    distance: f64,
    duration: f64,
}

/// Minimum spacing between requests, shared by every caller of one client
struct RateLimit {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimit {
    fn new(min_interval: Duration) -> Self {
        RateLimit {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Time until the next request may go out.
    fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    fn remaining_at(&self, now: Instant) -> Duration {
        let last = match self.last_request.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *last {
            Some(previous) => (previous + self.min_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Claim the slot if it is free now, otherwise report the wait.
    ///
    /// Only an actual request claims a slot, so a caller that gives up while
    /// waiting leaves nothing behind.
    fn try_claim(&self) -> Duration {
        let now = Instant::now();
        let mut last = match self.last_request.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let wait = match *last {
            Some(previous) => (previous + self.min_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        };
        if wait.is_zero() {
            *last = Some(now);
        }
        wait
    }

    async fn wait_free(&self) {
        loop {
            let wait = self.remaining();
            if wait.is_zero() {
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = self.try_claim();
            if wait.is_zero() {
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }
}

/// OSRM route service client
///
/// # Request
/// `GET {base_url}/route/v1/{profile}/{lon},{lat};{lon},{lat}?overview=full&geometries=polyline`
///
/// # Error Handling
/// - HTTP 429: `RateLimited`, no retry (the stitcher falls back instead)
/// - `NoRoute` / `NoSegment` codes or empty geometry: `NoRoute`
/// - Transport timeout: `Timeout`
/// - Unparseable body: `Decode`
pub struct OsrmClient {
    client: reqwest::Client,
    base_url: String,
    profile: String,
    rate_limit: RateLimit,
}

impl OsrmClient {
    pub fn new(config: &RoutingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.segment_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("HTTP client setup failed ({}), using defaults", e);
                reqwest::Client::new()
            });

        OsrmClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            profile: config.profile.clone(),
            rate_limit: RateLimit::new(config.inter_request_pause()),
        }
    }

    fn route_url(&self, from: GeoPoint, to: GeoPoint) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=polyline",
            self.base_url, self.profile, from.longitude, from.latitude, to.longitude, to.latitude
        )
    }

    async fn fetch(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteLeg, RoutingError> {
        self.rate_limit.acquire().await;

        let url = self.route_url(from, to);
        log::debug!("OSRM request: {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                RoutingError::Timeout
            } else {
                RoutingError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            log::warn!("Rate limited by OSRM");
            return Err(RoutingError::RateLimited);
        }

        let body = response
            .text()
            .await
            .map_err(|e| RoutingError::Network(format!("failed to read response: {}", e)))?;

        // OSRM reports NoRoute with a 400 and a JSON body
        match parse_route_response(&body) {
            Err(RoutingError::Decode(_)) if !status.is_success() => {
                Err(RoutingError::Http(status.as_u16()))
            }
            other => other,
        }
    }
}

impl RoutingOracle for OsrmClient {
    async fn ready(&self) {
        self.rate_limit.wait_free().await
    }

    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteLeg, RoutingError> {
        self.fetch(from, to).await
    }
}

/// Parse an OSRM `/route` response body into the first route's leg.
fn parse_route_response(body: &str) -> Result<RouteLeg, RoutingError> {
    let response: OsrmResponse =
        serde_json::from_str(body).map_err(|e| RoutingError::Decode(e.to_string()))?;

    match response.code.as_str() {
        "Ok" => {}
        "NoRoute" | "NoSegment" => return Err(RoutingError::NoRoute),
        other => {
            return Err(RoutingError::Decode(format!(
                "OSRM code {}: {}",
                other,
                response.message.unwrap_or_default()
            )))
        }
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or(RoutingError::NoRoute)?;

    let points = polyline::decode(&route.geometry)?;
    if points.is_empty() {
        return Err(RoutingError::NoRoute);
    }

    Ok(RouteLeg {
        points,
        distance_meters: route.distance,
        duration_seconds: route.duration,
    })
}
