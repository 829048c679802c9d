//! Per-session bounded track log
//!
//! Samples are appended in strictly increasing timestamp order and annotated
//! with deltas from the previous sample. Retention keeps at most
//! `max_samples` points and drops anything older than `max_age_ms` relative
//! to the newest point, whichever bound bites first.

use crate::domain::error::CoreError;
use crate::domain::geo;
use crate::domain::types::{Location, LocationSample};
use serde::Serialize;
use std::collections::VecDeque;

/// A recorded sample plus the deltas derived from its predecessor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub sample: LocationSample,
    pub sequence: u64,
    /// Meters
    pub distance_from_previous: f64,
    /// Seconds
    pub time_from_previous: f64,
    /// m/s, 0 when no time elapsed
    pub speed: f64,
    /// Bearing of the leg from the previous point; None for the first point
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
}

impl TrackPoint {
    #[inline]
    pub fn location(&self) -> Location {
        self.sample.location()
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.sample.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_samples: usize,
    pub max_age_ms: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_samples: 200, max_age_ms: 30 * 60 * 1000 }
    }
}

#[derive(Debug, Clone)]
pub struct TrackRecorder {
    points: VecDeque<TrackPoint>,
    policy: RetentionPolicy,
}

impl TrackRecorder {
    pub fn new(policy: RetentionPolicy) -> Self {
        let policy = RetentionPolicy { max_samples: policy.max_samples.max(1), ..policy };
        Self { points: VecDeque::with_capacity(policy.max_samples.min(256)), policy }
    }

    /// Append a validated sample, rejecting any timestamp not after the last
    pub fn append(&mut self, sample: LocationSample, sequence: u64) -> Result<&TrackPoint, CoreError> {
        let point = match self.points.back() {
            Some(prev) => {
                if sample.timestamp <= prev.timestamp() {
                    return Err(CoreError::invalid_sample(format!(
                        "timestamp {} is not after last recorded {}",
                        sample.timestamp,
                        prev.timestamp()
                    )));
                }
                let distance = geo::distance_meters(prev.location(), sample.location());
                let seconds = (sample.timestamp - prev.timestamp()) as f64 / 1000.0;
                let speed = if seconds > 0.0 { distance / seconds } else { 0.0 };
                TrackPoint {
                    bearing: Some(geo::bearing_degrees(prev.location(), sample.location())),
                    sample,
                    sequence,
                    distance_from_previous: distance,
                    time_from_previous: seconds,
                    speed,
                }
            }
            None => TrackPoint {
                sample,
                sequence,
                distance_from_previous: 0.0,
                time_from_previous: 0.0,
                speed: 0.0,
                bearing: None,
            },
        };

        self.points.push_back(point);
        self.enforce_retention();

        // Retention never evicts the newest point
        Ok(&self.points[self.points.len() - 1])
    }

    fn enforce_retention(&mut self) {
        while self.points.len() > self.policy.max_samples {
            self.points.pop_front();
        }
        let Some(newest) = self.points.back().map(TrackPoint::timestamp) else {
            return;
        };
        while let Some(front) = self.points.front() {
            if newest - front.timestamp() > self.policy.max_age_ms {
                self.points.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn last(&self) -> Option<&TrackPoint> {
        self.points.back()
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.points.back().map(TrackPoint::timestamp)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Owned copy of the whole track, oldest first
    pub fn snapshot(&self) -> Vec<TrackPoint> {
        self.points.iter().cloned().collect()
    }

    /// Owned copy of the newest `n` points, oldest first
    pub fn recent(&self, n: usize) -> Vec<TrackPoint> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).cloned().collect()
    }
}

impl Default for TrackRecorder {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lat: f64, lng: f64, ts: u64) -> LocationSample {
        LocationSample::new(lat, lng, 5.0, ts)
    }

    #[test]
    fn test_first_point_has_zero_deltas() {
        let mut track = TrackRecorder::default();
        let point = track.append(sample(5.0, -4.0, 1_000), 1).unwrap();
        assert_eq!(point.distance_from_previous, 0.0);
        assert_eq!(point.speed, 0.0);
        assert!(point.bearing.is_none());
    }

    #[test]
    fn test_derived_metrics() {
        let origin = Location::new(5.3257, -4.0267);
        let next = geo::destination_point(origin, 100.0, 0.0);
        let mut track = TrackRecorder::default();
        track.append(LocationSample::at(origin, 5.0, 0), 1).unwrap();
        let point = track.append(LocationSample::at(next, 5.0, 50_000), 2).unwrap();

        assert!((point.distance_from_previous - 100.0).abs() < 0.01);
        assert_eq!(point.time_from_previous, 50.0);
        assert!((point.speed - 2.0).abs() < 0.001);
        let bearing = point.bearing.unwrap();
        assert!(bearing < 0.01 || bearing > 359.99);
    }

    #[test]
    fn test_rejects_out_of_order_and_equal_timestamps() {
        let mut track = TrackRecorder::default();
        track.append(sample(5.0, -4.0, 2_000), 1).unwrap();
        assert!(matches!(
            track.append(sample(5.0, -4.0, 2_000), 2),
            Err(CoreError::InvalidSample { .. })
        ));
        assert!(track.append(sample(5.0, -4.0, 1_000), 3).is_err());
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn test_count_bound() {
        let mut track = TrackRecorder::new(RetentionPolicy { max_samples: 3, max_age_ms: u64::MAX });
        for i in 0..10u64 {
            track.append(sample(5.0, -4.0, 1_000 + i), i).unwrap();
            assert!(track.len() <= 3);
        }
        let seqs: Vec<u64> = track.snapshot().iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, vec![7, 8, 9]);
    }

    #[test]
    fn test_age_bound() {
        let mut track = TrackRecorder::new(RetentionPolicy { max_samples: 100, max_age_ms: 60_000 });
        track.append(sample(5.0, -4.0, 0), 1).unwrap();
        track.append(sample(5.0, -4.0, 30_000), 2).unwrap();
        track.append(sample(5.0, -4.0, 90_000), 3).unwrap();
        // 0 is 90s old relative to the newest point
        assert_eq!(track.len(), 2);
        assert_eq!(track.snapshot()[0].sequence, 2);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut track = TrackRecorder::default();
        track.append(sample(5.0, -4.0, 1_000), 1).unwrap();
        let snapshot = track.snapshot();
        track.append(sample(5.0, -4.0, 2_000), 2).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(track.recent(1)[0].sequence, 2);
        assert_eq!(track.recent(10).len(), 2);
    }
}
