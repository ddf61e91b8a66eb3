//! Road routing: the oracle boundary, an OSRM client, and the stitcher that
//! joins per-segment legs into one path.

pub mod osrm;
pub mod polyline;
pub mod stitcher;

pub use osrm::OsrmClient;
pub use stitcher::{SegmentReport, SegmentSource, StitchedRoute, Stitcher};

use std::future::Future;

use crate::error::RoutingError;
use crate::types::GeoPoint;

/// One road-following leg between two points.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteLeg {
    pub points: Vec<GeoPoint>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// External service that turns a point pair into a road path.
pub trait RoutingOracle: Send + Sync + 'static {
    /// Resolves once the oracle would send a request without pacing it.
    /// Callers wait on this outside any per-request timeout.
    fn ready(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn route(
        &self,
        from: GeoPoint,
        to: GeoPoint,
    ) -> impl Future<Output = Result<RouteLeg, RoutingError>> + Send;
}

/// Oracle for running without network access. Every segment falls back.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineOracle;

impl RoutingOracle for OfflineOracle {
    async fn route(&self, _from: GeoPoint, _to: GeoPoint) -> Result<RouteLeg, RoutingError> {
        Err(RoutingError::Network("offline".to_string()))
    }
}
