//! Geofence state machine
//!
//! Each (session, POI) pair is `Outside`, `Inside` or `Dwelling`. Only
//! non-outside pairs are stored, so a session's `FenceSet` stays as small as
//! the number of fences it is currently in.
//!
//! Entry uses the fence radius, exit uses `radius * hysteresis_factor`, so a
//! fix wobbling on the boundary cannot flap. A fix whose accuracy is worse
//! than the fence's threshold never moves that fence.

use crate::domain::geo;
use crate::domain::types::{
    GeofenceEvent, GeofenceEventType, LocationSample, PoiId, PointOfInterest, SessionId,
};
use crate::services::point_index::CatalogSnapshot;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, info};

/// Events produced by one sample; more than a handful is rare
pub type FenceEvents = SmallVec<[GeofenceEvent; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FenceState {
    Outside,
    Inside,
    Dwelling,
}

/// Fence membership for one POI
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FenceStatus {
    pub state: FenceState,
    /// Timestamp of the sample that entered the fence
    pub entered_at: u64,
}

/// Per-session fence membership
#[derive(Debug, Clone, Default)]
pub struct FenceSet {
    fences: FxHashMap<PoiId, FenceStatus>,
}

impl FenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, poi_id: &PoiId) -> FenceState {
        self.fences.get(poi_id).map_or(FenceState::Outside, |s| s.state)
    }

    pub fn status(&self, poi_id: &PoiId) -> Option<&FenceStatus> {
        self.fences.get(poi_id)
    }

    pub fn is_inside(&self, poi_id: &PoiId) -> bool {
        self.fences.contains_key(poi_id)
    }

    /// POIs currently inside or dwelling, sorted by id
    pub fn inside_ids(&self) -> Vec<PoiId> {
        let mut ids: Vec<PoiId> = self.fences.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PoiId, &FenceStatus)> {
        self.fences.iter()
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }
}

/// `1 - value / limit` clamped to [0, 1]
#[inline]
fn closeness(value: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        return if value <= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - value / limit).clamp(0.0, 1.0)
}

/// How far past the exit radius a fix is, as a fraction of that radius
#[inline]
fn beyond(value: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        return 1.0;
    }
    ((value - limit) / limit).clamp(0.0, 1.0)
}

pub struct GeofenceEngine {
    hysteresis_factor: f64,
}

impl GeofenceEngine {
    pub fn new(hysteresis_factor: f64) -> Self {
        Self { hysteresis_factor: hysteresis_factor.max(1.0) }
    }

    pub fn hysteresis_factor(&self) -> f64 {
        self.hysteresis_factor
    }

    /// Evaluate one validated sample against every fence that could contain
    /// it plus every fence the session is already in.
    ///
    /// Returned events are ordered exits, enters, dwells, then by POI id.
    pub fn evaluate(
        &self,
        session_id: &SessionId,
        sample: &LocationSample,
        sequence: u64,
        catalog: &CatalogSnapshot,
        fences: &mut FenceSet,
    ) -> FenceEvents {
        let location = sample.location();
        let search_radius = catalog.max_radius() * self.hysteresis_factor;

        let mut events = FenceEvents::new();
        let mut seen: FxHashSet<PoiId> = FxHashSet::default();

        for hit in catalog.query(location, search_radius, None) {
            seen.insert(hit.poi.id.clone());
            self.step(session_id, sample, sequence, hit.poi, hit.distance, fences, &mut events);
        }

        // Fences the session is in but that fell outside the search circle
        let stale: Vec<PoiId> =
            fences.fences.keys().filter(|id| !seen.contains(*id)).cloned().collect();
        for poi_id in stale {
            match catalog.get(&poi_id) {
                Some(poi) => {
                    let distance = geo::distance_meters(location, poi.location());
                    self.step(session_id, sample, sequence, poi, distance, fences, &mut events);
                }
                None => {
                    fences.fences.remove(&poi_id);
                    debug!(session_id = %session_id, poi_id = %poi_id, "fence_dropped_poi_removed");
                }
            }
        }

        events.sort_by(|a, b| a.event_type.cmp(&b.event_type).then_with(|| a.poi_id.cmp(&b.poi_id)));
        events
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &self,
        session_id: &SessionId,
        sample: &LocationSample,
        sequence: u64,
        poi: &PointOfInterest,
        distance: f64,
        fences: &mut FenceSet,
        events: &mut FenceEvents,
    ) {
        let fence = &poi.geofence;
        if sample.accuracy > fence.accuracy_threshold {
            return;
        }

        let accuracy_score = closeness(sample.accuracy, fence.accuracy_threshold);
        let exit_radius = fence.radius * self.hysteresis_factor;
        let ts = sample.timestamp;

        let emit = |event_type: GeofenceEventType, confidence: f64| GeofenceEvent {
            session_id: session_id.clone(),
            poi_id: poi.id.clone(),
            poi_name: poi.name.clone(),
            event_type,
            distance,
            timestamp: ts,
            confidence: confidence.clamp(0.0, 1.0),
            sequence,
        };

        match fences.fences.get(&poi.id).copied() {
            None => {
                if distance <= fence.radius {
                    fences
                        .fences
                        .insert(poi.id.clone(), FenceStatus { state: FenceState::Inside, entered_at: ts });
                    if fence.entry_trigger {
                        let confidence = (closeness(distance, fence.radius) + accuracy_score) / 2.0;
                        info!(
                            session_id = %session_id,
                            poi_id = %poi.id,
                            distance = %format!("{:.1}", distance),
                            confidence = %format!("{:.2}", confidence),
                            "geofence_enter"
                        );
                        events.push(emit(GeofenceEventType::Enter, confidence));
                    }
                }
            }
            Some(status) => {
                if distance > exit_radius {
                    fences.fences.remove(&poi.id);
                    if fence.exit_trigger {
                        let confidence = (beyond(distance, exit_radius) + accuracy_score) / 2.0;
                        info!(
                            session_id = %session_id,
                            poi_id = %poi.id,
                            distance = %format!("{:.1}", distance),
                            inside_ms = %ts.saturating_sub(status.entered_at),
                            "geofence_exit"
                        );
                        events.push(emit(GeofenceEventType::Exit, confidence));
                    }
                    return;
                }

                let dwell_ms = fence.dwell_time_trigger.saturating_mul(1000);
                if status.state == FenceState::Inside
                    && fence.dwell_time_trigger > 0
                    && ts.saturating_sub(status.entered_at) >= dwell_ms
                {
                    if let Some(s) = fences.fences.get_mut(&poi.id) {
                        s.state = FenceState::Dwelling;
                    }
                    let confidence = (closeness(distance, fence.radius) + accuracy_score) / 2.0;
                    info!(
                        session_id = %session_id,
                        poi_id = %poi.id,
                        dwell_secs = %(ts.saturating_sub(status.entered_at) / 1000),
                        "geofence_dwell"
                    );
                    events.push(emit(GeofenceEventType::Dwell, confidence));
                }
            }
        }
    }
}

impl Default for GeofenceEngine {
    fn default() -> Self {
        Self::new(1.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Location;

    const POI_CENTER: Location = Location::new(5.3257, -4.0267);

    fn sample_at(distance: f64, accuracy: f64, ts: u64) -> LocationSample {
        LocationSample::at(geo::destination_point(POI_CENTER, distance, 90.0), accuracy, ts)
    }

    fn catalog_with(poi: PointOfInterest) -> CatalogSnapshot {
        CatalogSnapshot::build(vec![poi], 0)
    }

    fn plateau() -> PointOfInterest {
        let mut poi = PointOfInterest::new("plateau", POI_CENTER, "district");
        poi.name = "Plateau".to_string();
        poi
    }

    struct Harness {
        engine: GeofenceEngine,
        catalog: CatalogSnapshot,
        fences: FenceSet,
        session: SessionId,
        seq: u64,
    }

    impl Harness {
        fn new(poi: PointOfInterest, hysteresis: f64) -> Self {
            Self {
                engine: GeofenceEngine::new(hysteresis),
                catalog: catalog_with(poi),
                fences: FenceSet::new(),
                session: SessionId::from("s1"),
                seq: 0,
            }
        }

        fn feed(&mut self, sample: LocationSample) -> FenceEvents {
            self.seq += 1;
            self.engine.evaluate(&self.session, &sample, self.seq, &self.catalog, &mut self.fences)
        }
    }

    #[test]
    fn test_enter_then_worse_fix_keeps_state() {
        let mut h = Harness::new(plateau(), 1.1);

        let events = h.feed(sample_at(40.0, 10.0, 1_000));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, GeofenceEventType::Enter);
        assert_eq!(events[0].poi_name, "Plateau");
        assert_eq!(events[0].sequence, 1);
        assert!((events[0].distance - 40.0).abs() < 0.1);
        // (1 - 40/50 + 1 - 10/20) / 2
        assert!((events[0].confidence - 0.35).abs() < 0.01);

        let events = h.feed(sample_at(40.0, 30.0, 2_000));
        assert!(events.is_empty());
        assert_eq!(h.fences.state(&PoiId::from("plateau")), FenceState::Inside);
    }

    #[test]
    fn test_inaccurate_fix_never_enters() {
        let mut h = Harness::new(plateau(), 1.1);
        assert!(h.feed(sample_at(5.0, 25.0, 1_000)).is_empty());
        assert_eq!(h.fences.state(&PoiId::from("plateau")), FenceState::Outside);
    }

    #[test]
    fn test_inaccurate_fix_never_exits() {
        let mut h = Harness::new(plateau(), 1.1);
        h.feed(sample_at(10.0, 5.0, 1_000));
        assert!(h.feed(sample_at(500.0, 40.0, 2_000)).is_empty());
        assert!(h.fences.is_inside(&PoiId::from("plateau")));
    }

    #[test]
    fn test_hysteresis_prevents_flapping() {
        let mut h = Harness::new(plateau(), 1.1);
        let mut enters = 0;
        let mut exits = 0;
        for i in 0..20u64 {
            let distance = if i % 2 == 0 { 49.5 } else { 50.5 };
            for e in h.feed(sample_at(distance, 5.0, 1_000 + i * 1_000)) {
                match e.event_type {
                    GeofenceEventType::Enter => enters += 1,
                    GeofenceEventType::Exit => exits += 1,
                    GeofenceEventType::Dwell => {}
                }
            }
        }
        assert_eq!(enters, 1);
        assert_eq!(exits, 0);

        let events = h.feed(sample_at(60.0, 5.0, 100_000));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, GeofenceEventType::Exit);
        assert!(events[0].confidence > 0.0 && events[0].confidence <= 1.0);
    }

    #[test]
    fn test_without_hysteresis_boundary_flaps() {
        let mut h = Harness::new(plateau(), 1.0);
        let mut total = 0;
        for i in 0..4u64 {
            let distance = if i % 2 == 0 { 49.5 } else { 50.5 };
            total += h.feed(sample_at(distance, 5.0, 1_000 + i * 1_000)).len();
        }
        assert_eq!(total, 4);
    }

    #[test]
    fn test_dwell_fires_once() {
        let mut poi = plateau();
        poi.geofence.dwell_time_trigger = 60;
        let mut h = Harness::new(poi, 1.1);

        h.feed(sample_at(10.0, 5.0, 0));
        assert!(h.feed(sample_at(12.0, 5.0, 30_000)).is_empty());

        let events = h.feed(sample_at(12.0, 5.0, 60_000));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, GeofenceEventType::Dwell);
        assert_eq!(h.fences.state(&PoiId::from("plateau")), FenceState::Dwelling);

        assert!(h.feed(sample_at(12.0, 5.0, 120_000)).is_empty());

        let events = h.feed(sample_at(200.0, 5.0, 130_000));
        assert_eq!(events[0].event_type, GeofenceEventType::Exit);
    }

    #[test]
    fn test_trigger_flags_gate_emission_only() {
        let mut poi = plateau();
        poi.geofence.entry_trigger = false;
        poi.geofence.exit_trigger = false;
        let mut h = Harness::new(poi, 1.1);

        assert!(h.feed(sample_at(10.0, 5.0, 1_000)).is_empty());
        assert!(h.fences.is_inside(&PoiId::from("plateau")));
        assert!(h.feed(sample_at(300.0, 5.0, 2_000)).is_empty());
        assert!(!h.fences.is_inside(&PoiId::from("plateau")));
    }

    #[test]
    fn test_overlapping_fences_ordering() {
        let a = PointOfInterest::new("a", POI_CENTER, "x");
        let b = PointOfInterest::new("b", geo::destination_point(POI_CENTER, 30.0, 0.0), "x");
        let mut fences = FenceSet::new();
        let engine = GeofenceEngine::new(1.1);
        let catalog = CatalogSnapshot::build(vec![b, a], 0);
        let session = SessionId::from("s");

        let sample = LocationSample::at(geo::destination_point(POI_CENTER, 15.0, 0.0), 5.0, 1);
        let events = engine.evaluate(&session, &sample, 1, &catalog, &mut fences);
        let ids: Vec<&str> = events.iter().map(|e| e.poi_id.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(fences.inside_ids().len(), 2);

        // 70 m north: past a's exit radius, still inside b
        let sample = LocationSample::at(geo::destination_point(POI_CENTER, 70.0, 0.0), 5.0, 2);
        let events = engine.evaluate(&session, &sample, 2, &catalog, &mut fences);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].poi_id, PoiId::from("a"));
        assert_eq!(events[0].event_type, GeofenceEventType::Exit);
    }

    #[test]
    fn test_removed_poi_dropped_silently() {
        let mut h = Harness::new(plateau(), 1.1);
        h.feed(sample_at(10.0, 5.0, 1_000));
        h.catalog = CatalogSnapshot::build(Vec::new(), 1);
        assert!(h.feed(sample_at(10.0, 5.0, 2_000)).is_empty());
        assert!(h.fences.is_empty());
    }

    #[test]
    fn test_closeness_guards_zero_limit() {
        assert_eq!(closeness(0.0, 0.0), 1.0);
        assert_eq!(closeness(1.0, 0.0), 0.0);
        assert_eq!(closeness(30.0, 20.0), 0.0);
        assert_eq!(beyond(10.0, 0.0), 1.0);
        assert_eq!(beyond(110.0, 55.0), 1.0);
    }
}
