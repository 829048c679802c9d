//! Services - tracking logic and per-session state
//!
//! This module contains the core services:
//! - `point_index` - Spatial index over the POI catalog snapshot
//! - `geofence` - Enter/exit/dwell state machine with hysteresis
//! - `track_recorder` - Bounded, strictly ordered per-session track
//! - `movement` - Pattern classification, hotspots and path prediction
//! - `route_optimizer` - Greedy + 2-opt visit sequencing under a time budget
//! - `coordinator` - Session ownership and the ingest entry point

pub mod coordinator;
pub mod geofence;
pub mod movement;
pub mod point_index;
pub mod route_optimizer;
pub mod track_recorder;

// Re-export commonly used types
pub use coordinator::{IngestOutcome, RouteOrigin, SessionCoordinator, SessionSnapshot};
pub use geofence::GeofenceEngine;
pub use movement::{Hotspot, MovementAnalyzer, PathPrediction, Velocity};
pub use point_index::{NearbyPoi, NearbyQuery, NearbySort, PointIndex};
pub use route_optimizer::RouteOptimizer;
pub use track_recorder::{TrackPoint, TrackRecorder};
