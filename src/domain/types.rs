//! Shared types for the guide tracker

use crate::domain::error::CoreError;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for session IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Newtype wrapper for POI IDs from the external catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoiId(pub String);

impl std::fmt::Display for PoiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PoiId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    #[inline]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Finite and inside the lat/lng ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// What the user was doing when the fix was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleContext {
    Navigation,
    Listening,
    #[default]
    Exploring,
    Searching,
}

/// A single GPS fix from the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Device-reported speed (m/s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Device-reported heading (degrees)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Epoch milliseconds
    pub timestamp: u64,
    #[serde(default)]
    pub context: SampleContext,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp: u64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            altitude: None,
            speed: None,
            heading: None,
            timestamp,
            context: SampleContext::default(),
        }
    }

    pub fn at(location: Location, accuracy: f64, timestamp: u64) -> Self {
        Self::new(location.latitude, location.longitude, accuracy, timestamp)
    }

    pub fn with_context(mut self, context: SampleContext) -> Self {
        self.context = context;
        self
    }

    #[inline]
    pub fn location(&self) -> Location {
        Location::new(self.latitude, self.longitude)
    }

    /// Reject fixes that must never reach the geometry code
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(CoreError::invalid_sample("non-finite coordinates"));
        }
        if !self.location().is_valid() {
            return Err(CoreError::invalid_sample("coordinates out of range"));
        }
        if !self.accuracy.is_finite() || self.accuracy < 0.0 {
            return Err(CoreError::invalid_sample("accuracy must be a finite value >= 0"));
        }
        let optional_ok = [self.altitude, self.speed, self.heading]
            .iter()
            .flatten()
            .all(|v| v.is_finite());
        if !optional_ok {
            return Err(CoreError::invalid_sample("non-finite altitude, speed or heading"));
        }
        Ok(())
    }
}

fn default_radius() -> f64 {
    50.0
}

fn default_true() -> bool {
    true
}

fn default_accuracy_threshold() -> f64 {
    20.0
}

/// Geofence trigger settings for a POI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceConfig {
    /// Fence radius in meters
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default = "default_true")]
    pub entry_trigger: bool,
    #[serde(default = "default_true")]
    pub exit_trigger: bool,
    /// Seconds inside before a dwell fires (0 disables)
    #[serde(default)]
    pub dwell_time_trigger: u64,
    /// Fixes with a worse accuracy than this never move the fence state
    #[serde(default = "default_accuracy_threshold")]
    pub accuracy_threshold: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            entry_trigger: true,
            exit_trigger: true,
            dwell_time_trigger: 0,
            accuracy_threshold: default_accuracy_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrowdLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl CrowdLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrowdLevel::Low => "low",
            CrowdLevel::Medium => "medium",
            CrowdLevel::High => "high",
        }
    }
}

fn default_visit_minutes() -> f64 {
    30.0
}

fn default_popularity() -> f64 {
    0.5
}

/// Behavioral metadata used by the route optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitProfile {
    #[serde(default = "default_visit_minutes")]
    pub optimal_visit_duration_minutes: f64,
    #[serde(default)]
    pub crowd_level: CrowdLevel,
    /// In [0, 1]
    #[serde(default = "default_popularity")]
    pub popularity_score: f64,
}

impl Default for VisitProfile {
    fn default() -> Self {
        Self {
            optimal_visit_duration_minutes: default_visit_minutes(),
            crowd_level: CrowdLevel::default(),
            popularity_score: default_popularity(),
        }
    }
}

/// Catalog entry: an attraction with a location and visit metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointOfInterest {
    pub id: PoiId,
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
    /// Average review rating (0-5), used only for ranking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub visit_profile: VisitProfile,
}

impl PointOfInterest {
    pub fn new(id: &str, location: Location, category: &str) -> Self {
        Self {
            id: PoiId::from(id),
            name: id.to_string(),
            latitude: location.latitude,
            longitude: location.longitude,
            category: category.to_string(),
            rating: None,
            geofence: GeofenceConfig::default(),
            visit_profile: VisitProfile::default(),
        }
    }

    #[inline]
    pub fn location(&self) -> Location {
        Location::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeofenceEventType {
    Exit,
    Enter,
    Dwell,
}

impl GeofenceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceEventType::Enter => "enter",
            GeofenceEventType::Exit => "exit",
            GeofenceEventType::Dwell => "dwell",
        }
    }
}

/// Emitted on a fence transition; never stored by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    pub session_id: SessionId,
    pub poi_id: PoiId,
    pub poi_name: String,
    #[serde(rename = "type")]
    pub event_type: GeofenceEventType,
    /// Meters from the POI center at the triggering sample
    pub distance: f64,
    /// Timestamp of the triggering sample (epoch ms)
    pub timestamp: u64,
    /// In [0, 1]
    pub confidence: f64,
    /// Session sample sequence number that produced the event
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementPattern {
    #[default]
    Stationary,
    Walking,
    Cycling,
    Exploring,
    Directed,
}

impl MovementPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementPattern::Stationary => "stationary",
            MovementPattern::Walking => "walking",
            MovementPattern::Cycling => "cycling",
            MovementPattern::Exploring => "exploring",
            MovementPattern::Directed => "directed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_validation() {
        assert!(LocationSample::new(5.3257, -4.0267, 10.0, 1_000).validate().is_ok());
        assert!(LocationSample::new(f64::NAN, -4.0, 10.0, 1_000).validate().is_err());
        assert!(LocationSample::new(91.0, 0.0, 10.0, 1_000).validate().is_err());
        assert!(LocationSample::new(0.0, 181.0, 10.0, 1_000).validate().is_err());
        assert!(LocationSample::new(0.0, 0.0, -1.0, 1_000).validate().is_err());

        let mut sample = LocationSample::new(0.0, 0.0, 5.0, 1_000);
        sample.speed = Some(f64::INFINITY);
        assert!(sample.validate().is_err());
    }

    #[test]
    fn test_poi_deserialize_defaults() {
        let json = r#"{"id":"museum-1","latitude":5.32,"longitude":-4.02,"category":"museum"}"#;
        let poi: PointOfInterest = serde_json::from_str(json).unwrap();
        assert_eq!(poi.id, PoiId::from("museum-1"));
        assert_eq!(poi.geofence.radius, 50.0);
        assert!(poi.geofence.entry_trigger);
        assert_eq!(poi.geofence.dwell_time_trigger, 0);
        assert_eq!(poi.visit_profile.crowd_level, CrowdLevel::Medium);
    }

    #[test]
    fn test_poi_deserialize_camel_case() {
        let json = r#"{
            "id": "p",
            "latitude": 1.0,
            "longitude": 2.0,
            "category": "park",
            "geofence": {"radius": 80, "exitTrigger": false, "dwellTimeTrigger": 60, "accuracyThreshold": 30},
            "visitProfile": {"optimalVisitDurationMinutes": 45, "crowdLevel": "high", "popularityScore": 0.9}
        }"#;
        let poi: PointOfInterest = serde_json::from_str(json).unwrap();
        assert_eq!(poi.geofence.radius, 80.0);
        assert!(!poi.geofence.exit_trigger);
        assert_eq!(poi.geofence.dwell_time_trigger, 60);
        assert_eq!(poi.visit_profile.crowd_level, CrowdLevel::High);
        assert_eq!(poi.visit_profile.optimal_visit_duration_minutes, 45.0);
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = GeofenceEvent {
            session_id: SessionId::from("s1"),
            poi_id: PoiId::from("p1"),
            poi_name: "Plateau".to_string(),
            event_type: GeofenceEventType::Enter,
            distance: 12.5,
            timestamp: 42,
            confidence: 0.5,
            sequence: 1,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "enter");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["poiId"], "p1");
    }
}
