//! Route request/result value objects

use crate::domain::types::{Location, PoiId};
use serde::{Deserialize, Serialize};

/// Constraints applied while building a visit sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConstraints {
    /// Total travel + visit budget; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_minutes: Option<f64>,
    /// Keep only candidates in these categories (empty = all)
    #[serde(default)]
    pub preferred_categories: Vec<String>,
    /// Drop candidates with a high crowd level
    #[serde(default)]
    pub avoid_crowds: bool,
    /// Local hour (0-23) the visit starts at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day_hour: Option<u8>,
}

impl RouteConstraints {
    pub fn with_max_duration(mut self, minutes: f64) -> Self {
        self.max_duration_minutes = Some(minutes);
        self
    }

    pub fn with_preferred_categories(mut self, categories: &[&str]) -> Self {
        self.preferred_categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_avoid_crowds(mut self, avoid: bool) -> Self {
        self.avoid_crowds = avoid;
        self
    }

    pub fn with_time_of_day(mut self, hour: u8) -> Self {
        self.time_of_day_hour = Some(hour);
        self
    }

    /// True when `category` satisfies the preference list
    pub fn prefers(&self, category: &str) -> bool {
        self.preferred_categories.is_empty()
            || self.preferred_categories.iter().any(|c| c.eq_ignore_ascii_case(category))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    pub start_location: Location,
    pub candidate_poi_ids: Vec<PoiId>,
    #[serde(default)]
    pub constraints: RouteConstraints,
}

/// One stop of an optimized route
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub poi_id: PoiId,
    pub name: String,
    pub category: String,
    /// 1-based position in the route
    pub order: usize,
    pub travel_distance_from_previous: f64,
    pub estimated_travel_minutes: f64,
    pub visit_minutes: f64,
    /// Elapsed minutes once this stop has been visited
    pub cumulative_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    /// No candidates were supplied (or none survived filtering)
    Empty,
    /// Every eligible candidate is in the route
    Complete,
    /// Budget or compute limit cut the route short
    Partial,
    /// Not even the cheapest single candidate fits the budget
    Infeasible,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Empty => "empty",
            RouteStatus::Complete => "complete",
            RouteStatus::Partial => "partial",
            RouteStatus::Infeasible => "infeasible",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    pub stops: Vec<RouteStop>,
    pub total_distance: f64,
    pub total_travel_minutes: f64,
    pub total_visit_minutes: f64,
    pub total_duration_minutes: f64,
    /// In [0, 1]; 0 for infeasible routes
    pub optimization_score: f64,
    pub status: RouteStatus,
    /// Wall-clock compute budget ran out before construction finished
    pub budget_exceeded: bool,
}

impl RouteResult {
    /// Route with no stops; empty input scores 1, infeasible input scores 0
    pub fn empty(status: RouteStatus) -> Self {
        let optimization_score = if status == RouteStatus::Infeasible { 0.0 } else { 1.0 };
        Self {
            stops: Vec::new(),
            total_distance: 0.0,
            total_travel_minutes: 0.0,
            total_visit_minutes: 0.0,
            total_duration_minutes: 0.0,
            optimization_score,
            status,
            budget_exceeded: false,
        }
    }

    pub fn poi_ids(&self) -> Vec<&PoiId> {
        self.stops.iter().map(|s| &s.poi_id).collect()
    }
}
