//! Movement analysis over a session's recorded track
//!
//! - `classify` labels the last few legs (stationary/walking/cycling/...)
//! - `hotspots` clusters the whole track with a small k-means
//! - `predict` projects the current heading forward at fixed horizons
//!
//! All functions take an owned track snapshot, never the live recorder.

use crate::domain::geo;
use crate::domain::types::{Location, MovementPattern};
use crate::services::track_recorder::TrackPoint;
use serde::{Deserialize, Serialize};

/// Prediction horizons in seconds
pub const PREDICTION_HORIZONS_SECS: [u32; 4] = [30, 60, 120, 300];

/// Samples needed before a prediction is attempted
pub const MIN_PREDICTION_SAMPLES: usize = 3;

const MAX_HOTSPOTS: usize = 5;
const SAMPLES_PER_HOTSPOT: usize = 10;
const MAX_KMEANS_ITERATIONS: usize = 50;

/// Accuracy (m) at which the accuracy component reaches 0
const ACCURACY_CEILING_M: f64 = 50.0;
/// Age of the last sample at which the recency component reaches 0
const RECENCY_WINDOW_MS: f64 = 10.0 * 60.0 * 1000.0;

/// Speed / stability cut-offs for `classify`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementThresholds {
    /// m/s
    pub stationary_below: f64,
    /// m/s
    pub walking_below: f64,
    /// m/s
    pub cycling_below: f64,
    /// Direction stability under which fast movement is `exploring`
    pub exploring_stability_below: f64,
}

impl Default for MovementThresholds {
    fn default() -> Self {
        Self {
            stationary_below: 0.5,
            walking_below: 2.0,
            cycling_below: 15.0,
            exploring_stability_below: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementSummary {
    pub pattern: MovementPattern,
    /// Mean leg speed over the window (m/s)
    pub average_speed: f64,
    /// In [0, 1]; 1 = every leg points the same way
    pub direction_stability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotspot {
    pub center: Location,
    pub point_count: usize,
    /// Mean duration of contiguous visits to this cluster
    pub average_dwell_seconds: f64,
    /// Distance from the center to the farthest member (m)
    pub radius: f64,
}

/// Explicit velocity overriding the one derived from the track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Velocity {
    /// m/s
    pub speed: f64,
    /// Degrees
    pub bearing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedPoint {
    pub horizon_seconds: u32,
    pub location: Location,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathPrediction {
    pub points: Vec<PredictedPoint>,
    /// In [0, 1]; 0 when there was not enough history
    pub confidence: f64,
    pub speed: f64,
    pub bearing: f64,
}

impl PathPrediction {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

pub struct MovementAnalyzer {
    window: usize,
    thresholds: MovementThresholds,
}

impl MovementAnalyzer {
    /// `window` is clamped to 3..=5 samples
    pub fn new(window: usize) -> Self {
        Self { window: window.clamp(3, 5), thresholds: MovementThresholds::default() }
    }

    pub fn with_thresholds(mut self, thresholds: MovementThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn tail<'a>(&self, track: &'a [TrackPoint]) -> &'a [TrackPoint] {
        &track[track.len().saturating_sub(self.window)..]
    }

    /// Classify movement over the last `window` samples
    pub fn classify(&self, track: &[TrackPoint]) -> MovementSummary {
        let window = self.tail(track);
        if window.len() < 2 {
            return MovementSummary::default();
        }

        // Each point after the first carries the leg from its predecessor
        let legs = &window[1..];
        let average_speed = legs.iter().map(|p| p.speed).sum::<f64>() / legs.len() as f64;
        let direction_stability = 1.0 - bearing_spread(legs);

        let t = &self.thresholds;
        let pattern = if average_speed < t.stationary_below {
            MovementPattern::Stationary
        } else if average_speed < t.walking_below {
            MovementPattern::Walking
        } else if average_speed < t.cycling_below {
            MovementPattern::Cycling
        } else if direction_stability < t.exploring_stability_below {
            MovementPattern::Exploring
        } else {
            MovementPattern::Directed
        };

        MovementSummary { pattern, average_speed, direction_stability }
    }

    /// Cluster the track into at most five hotspots, most visited first
    pub fn hotspots(&self, track: &[TrackPoint]) -> Vec<Hotspot> {
        let n = track.len();
        if n == 0 {
            return Vec::new();
        }
        let k = (n / SAMPLES_PER_HOTSPOT).clamp(1, MAX_HOTSPOTS);
        let locations: Vec<Location> = track.iter().map(TrackPoint::location).collect();

        // Evenly spaced seeds keep the result deterministic
        let mut centers: Vec<Location> = (0..k).map(|i| locations[i * n / k]).collect();
        let mut assignment = vec![usize::MAX; n];

        for _ in 0..MAX_KMEANS_ITERATIONS {
            let mut changed = false;
            for (i, loc) in locations.iter().enumerate() {
                let nearest = nearest_center(&centers, *loc);
                if assignment[i] != nearest {
                    assignment[i] = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = vec![(0.0_f64, 0.0_f64, 0_usize); k];
            for (loc, &cluster) in locations.iter().zip(&assignment) {
                let s = &mut sums[cluster];
                s.0 += loc.latitude;
                s.1 += loc.longitude;
                s.2 += 1;
            }
            for (center, (lat, lng, count)) in centers.iter_mut().zip(sums) {
                // An empty cluster keeps its previous center
                if count > 0 {
                    *center = Location::new(lat / count as f64, lng / count as f64);
                }
            }
        }

        let mut hotspots: Vec<Hotspot> = centers
            .iter()
            .enumerate()
            .filter_map(|(cluster, &center)| {
                let members: Vec<Location> = locations
                    .iter()
                    .zip(&assignment)
                    .filter(|(_, &a)| a == cluster)
                    .map(|(l, _)| *l)
                    .collect();
                if members.is_empty() {
                    return None;
                }
                let radius = members
                    .iter()
                    .map(|m| geo::distance_meters(center, *m))
                    .fold(0.0_f64, f64::max);
                Some(Hotspot {
                    center,
                    point_count: members.len(),
                    average_dwell_seconds: average_run_seconds(track, &assignment, cluster),
                    radius,
                })
            })
            .collect();

        hotspots.sort_by(|a, b| {
            b.point_count
                .cmp(&a.point_count)
                .then_with(|| a.center.latitude.total_cmp(&b.center.latitude))
                .then_with(|| a.center.longitude.total_cmp(&b.center.longitude))
        });
        hotspots
    }

    /// Project the current motion forward; empty with confidence 0 when fewer
    /// than three samples are available
    pub fn predict(
        &self,
        track: &[TrackPoint],
        now_ms: u64,
        velocity: Option<Velocity>,
    ) -> PathPrediction {
        if track.len() < MIN_PREDICTION_SAMPLES {
            return PathPrediction::empty();
        }
        let window = self.tail(track);
        let legs = &window[1..];
        let Some(last) = window.last() else {
            return PathPrediction::empty();
        };

        let speeds: Vec<f64> = legs.iter().map(|p| p.speed).collect();
        let velocity = velocity.unwrap_or_else(|| Velocity {
            speed: mean(&speeds),
            bearing: mean_bearing(legs).unwrap_or(0.0),
        });

        let consistency = speed_consistency(&speeds);
        let mean_accuracy = mean(&window.iter().map(|p| p.sample.accuracy).collect::<Vec<_>>());
        let accuracy = (1.0 - mean_accuracy / ACCURACY_CEILING_M).clamp(0.0, 1.0);
        let age_ms = now_ms.saturating_sub(last.timestamp()) as f64;
        let recency = (1.0 - age_ms / RECENCY_WINDOW_MS).clamp(0.0, 1.0);
        let confidence = (consistency + accuracy + recency) / 3.0;

        let horizon_max = PREDICTION_HORIZONS_SECS[PREDICTION_HORIZONS_SECS.len() - 1] as f64;
        let origin = last.location();
        let points = PREDICTION_HORIZONS_SECS
            .iter()
            .map(|&h| PredictedPoint {
                horizon_seconds: h,
                location: geo::destination_point(
                    origin,
                    velocity.speed.max(0.0) * h as f64,
                    velocity.bearing,
                ),
                confidence: (confidence * (1.0 - h as f64 / horizon_max)).clamp(0.0, 1.0),
            })
            .collect();

        PathPrediction {
            points,
            confidence,
            speed: velocity.speed,
            bearing: geo::normalize_bearing(velocity.bearing),
        }
    }
}

impl Default for MovementAnalyzer {
    fn default() -> Self {
        Self::new(5)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 1 / (1 + coefficient of variation); a track with no movement is perfectly consistent
fn speed_consistency(speeds: &[f64]) -> f64 {
    let m = mean(speeds);
    if speeds.is_empty() || m <= f64::EPSILON {
        return 1.0;
    }
    let variance = speeds.iter().map(|s| (s - m).powi(2)).sum::<f64>() / speeds.len() as f64;
    1.0 / (1.0 + variance.sqrt() / m)
}

/// Leg bearings, skipping zero-length legs whose bearing is meaningless
fn leg_bearings(legs: &[TrackPoint]) -> impl Iterator<Item = f64> + '_ {
    legs.iter()
        .filter(|p| p.distance_from_previous > 0.0)
        .filter_map(|p| p.bearing)
}

/// Mean resultant (sin, cos) and count of the leg bearings
fn resultant(legs: &[TrackPoint]) -> Option<(f64, f64, usize)> {
    let (mut sin, mut cos, mut n) = (0.0, 0.0, 0usize);
    for b in leg_bearings(legs) {
        let r = b.to_radians();
        sin += r.sin();
        cos += r.cos();
        n += 1;
    }
    (n > 0).then(|| (sin / n as f64, cos / n as f64, n))
}

fn mean_bearing(legs: &[TrackPoint]) -> Option<f64> {
    let (sin, cos, _) = resultant(legs)?;
    if sin.hypot(cos) < 1e-9 {
        return None;
    }
    Some(geo::normalize_bearing(sin.atan2(cos).to_degrees()))
}

/// Circular standard deviation of leg bearings, normalized by 180 degrees
fn bearing_spread(legs: &[TrackPoint]) -> f64 {
    let Some((sin, cos, _)) = resultant(legs) else {
        return 1.0;
    };
    let r = sin.hypot(cos).min(1.0);
    if r < 1e-9 {
        return 1.0;
    }
    let std_deg = (-2.0 * r.ln()).sqrt().to_degrees();
    (std_deg / 180.0).clamp(0.0, 1.0)
}

fn nearest_center(centers: &[Location], loc: Location) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = geo::distance_meters(*c, loc);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

/// Mean duration of contiguous runs of samples assigned to `cluster`
fn average_run_seconds(track: &[TrackPoint], assignment: &[usize], cluster: usize) -> f64 {
    let mut runs: Vec<f64> = Vec::new();
    let mut run_start: Option<u64> = None;
    let mut run_end = 0u64;

    for (point, &a) in track.iter().zip(assignment) {
        if a == cluster {
            if run_start.is_none() {
                run_start = Some(point.timestamp());
            }
            run_end = point.timestamp();
        } else if let Some(start) = run_start.take() {
            runs.push((run_end - start) as f64 / 1000.0);
        }
    }
    if let Some(start) = run_start {
        runs.push((run_end - start) as f64 / 1000.0);
    }
    mean(&runs)
}
