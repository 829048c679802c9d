//! Domain models - value types, geometry and errors
//!
//! This module contains the canonical data types used throughout the system:
//! - `LocationSample` - a single GPS fix from the device
//! - `PointOfInterest` - catalog entry with geofence and visit metadata
//! - `GeofenceEvent` - enter/exit/dwell notifications
//! - `RouteRequest` / `RouteResult` - route optimizer value objects
//! - `geo` - great-circle distance, bearing and projection
//! - `CoreError` - error taxonomy

pub mod error;
pub mod geo;
pub mod route;
pub mod types;

// Re-export commonly used types at module level
pub use error::CoreError;
pub use route::{RouteConstraints, RouteRequest, RouteResult, RouteStatus, RouteStop};
pub use types::{
    epoch_ms, CrowdLevel, GeofenceConfig, GeofenceEvent, GeofenceEventType, Location,
    LocationSample, MovementPattern, PoiId, PointOfInterest, SampleContext, SessionId,
    VisitProfile,
};
