//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `http` - JSON HTTP facade over the session coordinator
//! - `catalog` - POI catalog loading (file or HTTP) and periodic refresh
//! - `egress_channel` - Bounded channel carrying emitted geofence events
//! - `egress` - Geofence event output to file (JSONL format)
//! - `prometheus` - Prometheus text rendering of metrics

pub mod catalog;
pub mod egress;
pub mod egress_channel;
pub mod http;
pub mod prometheus;

// Re-export commonly used types
pub use catalog::{parse_catalog, CatalogLoader, CatalogSource};
pub use egress::Egress;
pub use egress_channel::{create_egress_channel, EgressMessage, EventSender};
pub use http::{start_http_server, AppState};
