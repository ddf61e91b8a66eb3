//! Delivery navigation core: position filtering, stop ordering, road route
//! stitching and the arrival state machine, driven by one coordinator task.

pub mod config;
pub mod coordinator;
pub mod dashboard;
pub mod error;
pub mod feed_monitor;
pub mod geocode;
pub mod geodesy;
pub mod navigation;
pub mod planner;
pub mod position_filter;
pub mod routing;
pub mod smoothing;
pub mod snapshot;
pub mod types;

pub use config::NavConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::{ErrorKind, NavError, Result, RoutingError};
pub use navigation::{NavEvent, NavState, Navigator};
pub use position_filter::PositionFilter;
pub use routing::{OfflineOracle, OsrmClient, RoutingOracle, StitchedRoute};
pub use snapshot::DisplaySnapshot;
pub use types::{FilteredPosition, GeoPoint, PositionSample, RoutePlan, Stop, StopId};
