//! Read-mostly spatial index over the POI catalog
//!
//! The catalog lives in an immutable `CatalogSnapshot`: POIs in a flat arena,
//! an R-tree of arena indices for bounding-box pre-filtering, and an id map.
//! Refreshing builds a whole new snapshot and swaps the `Arc`, so readers
//! either see the old catalog or the new one, never a mix.

use crate::domain::geo::{self, CompassDirection};
use crate::domain::types::{Location, PoiId, PointOfInterest};
use parking_lot::RwLock;
use rstar::{RTree, RTreeObject, AABB};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default walking pace (5 km/h) for walk-time estimates
pub const DEFAULT_WALKING_METERS_PER_MINUTE: f64 = 83.0;

/// Padding applied to the degree box so points on the rim are never cut
const ENVELOPE_PADDING: f64 = 1.01;

/// An arena index with its coordinates, as stored in the R-tree
#[derive(Debug, Clone, Copy)]
struct IndexedPoi {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedPoi {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

/// Optional narrowing of catalog queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoiFilter {
    pub category: Option<String>,
}

impl PoiFilter {
    pub fn category(category: &str) -> Self {
        Self { category: Some(category.to_string()) }
    }

    #[inline]
    pub fn matches(&self, poi: &PointOfInterest) -> bool {
        self.category.as_deref().map_or(true, |c| poi.category.eq_ignore_ascii_case(c))
    }
}

/// A query match borrowed from a snapshot
#[derive(Debug, Clone, Copy)]
pub struct PoiHit<'a> {
    pub poi: &'a PointOfInterest,
    pub distance: f64,
    pub bearing: f64,
}

/// Immutable catalog snapshot
#[derive(Debug)]
pub struct CatalogSnapshot {
    pois: Vec<PointOfInterest>,
    tree: RTree<IndexedPoi>,
    by_id: FxHashMap<PoiId, usize>,
    max_radius: f64,
    loaded_at_ms: Option<u64>,
}

impl CatalogSnapshot {
    /// Snapshot with no POIs that has never been loaded
    pub fn empty() -> Self {
        Self {
            pois: Vec::new(),
            tree: RTree::new(),
            by_id: FxHashMap::default(),
            max_radius: 0.0,
            loaded_at_ms: None,
        }
    }

    /// Build a snapshot, dropping invalid coordinates and duplicate ids
    pub fn build(pois: Vec<PointOfInterest>, loaded_at_ms: u64) -> Self {
        let mut arena = Vec::with_capacity(pois.len());
        let mut by_id = FxHashMap::default();

        for poi in pois {
            if !poi.location().is_valid() {
                warn!(poi_id = %poi.id, "catalog_poi_invalid_coordinates");
                continue;
            }
            if by_id.contains_key(&poi.id) {
                warn!(poi_id = %poi.id, "catalog_poi_duplicate_id");
                continue;
            }
            by_id.insert(poi.id.clone(), arena.len());
            arena.push(poi);
        }

        let indexed: Vec<IndexedPoi> = arena
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedPoi { idx, lat: p.latitude, lng: p.longitude })
            .collect();

        let max_radius = arena
            .iter()
            .map(|p| p.geofence.radius)
            .filter(|r| r.is_finite())
            .fold(0.0_f64, f64::max);

        Self {
            tree: RTree::bulk_load(indexed),
            pois: arena,
            by_id,
            max_radius,
            loaded_at_ms: Some(loaded_at_ms),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pois.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }

    pub fn pois(&self) -> &[PointOfInterest] {
        &self.pois
    }

    pub fn get(&self, id: &PoiId) -> Option<&PointOfInterest> {
        self.by_id.get(id).map(|&idx| &self.pois[idx])
    }

    /// Largest geofence radius in the catalog
    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    pub fn loaded_at_ms(&self) -> Option<u64> {
        self.loaded_at_ms
    }

    /// Every POI within `radius` meters of `center`, nearest first
    pub fn query(
        &self,
        center: Location,
        radius: f64,
        filter: Option<&PoiFilter>,
    ) -> Vec<PoiHit<'_>> {
        if self.pois.is_empty() || !(radius >= 0.0) {
            return Vec::new();
        }

        let mut hits: Vec<PoiHit<'_>> = Vec::new();
        for envelope in search_envelopes(center, radius) {
            for entry in self.tree.locate_in_envelope(&envelope) {
                let poi = &self.pois[entry.idx];
                if !filter.map_or(true, |f| f.matches(poi)) {
                    continue;
                }
                let distance = geo::distance_meters(center, poi.location());
                if distance <= radius {
                    hits.push(PoiHit { poi, distance, bearing: geo::bearing_degrees(center, poi.location()) });
                }
            }
        }

        hits.sort_by(compare_hits);
        hits
    }

    /// The `k` POIs nearest to `center`
    pub fn nearest_k(
        &self,
        center: Location,
        k: usize,
        filter: Option<&PoiFilter>,
    ) -> Vec<PoiHit<'_>> {
        if k == 0 {
            return Vec::new();
        }

        // Linear scan: haversine ordering differs from the tree's degree metric
        let mut hits: Vec<PoiHit<'_>> = self
            .pois
            .iter()
            .filter(|poi| filter.map_or(true, |f| f.matches(poi)))
            .map(|poi| PoiHit {
                poi,
                distance: geo::distance_meters(center, poi.location()),
                bearing: geo::bearing_degrees(center, poi.location()),
            })
            .collect();

        hits.sort_by(compare_hits);
        hits.truncate(k);
        hits
    }

    /// Resolve ids in request order, skipping ids the catalog does not know
    pub fn resolve(&self, ids: &[PoiId]) -> Vec<&PointOfInterest> {
        ids.iter()
            .filter_map(|id| {
                let poi = self.get(id);
                if poi.is_none() {
                    debug!(poi_id = %id, "catalog_poi_unknown");
                }
                poi
            })
            .collect()
    }
}

fn compare_hits(a: &PoiHit<'_>, b: &PoiHit<'_>) -> Ordering {
    a.distance.total_cmp(&b.distance).then_with(|| a.poi.id.cmp(&b.poi.id))
}

/// Degree boxes covering the search circle, split at the antimeridian
fn search_envelopes(center: Location, radius: f64) -> Vec<AABB<[f64; 2]>> {
    let (lat_deg, lng_deg) = geo::degree_extents(center, radius * ENVELOPE_PADDING + 1.0);
    let min_lat = (center.latitude - lat_deg).max(-90.0);
    let max_lat = (center.latitude + lat_deg).min(90.0);

    // Near a pole the circle can contain every longitude
    if lng_deg >= 180.0 || max_lat >= 90.0 || min_lat <= -90.0 {
        return vec![AABB::from_corners([min_lat, -180.0], [max_lat, 180.0])];
    }

    let min_lng = center.longitude - lng_deg;
    let max_lng = center.longitude + lng_deg;

    if min_lng < -180.0 {
        vec![
            AABB::from_corners([min_lat, -180.0], [max_lat, max_lng]),
            AABB::from_corners([min_lat, min_lng + 360.0], [max_lat, 180.0]),
        ]
    } else if max_lng > 180.0 {
        vec![
            AABB::from_corners([min_lat, min_lng], [max_lat, 180.0]),
            AABB::from_corners([min_lat, -180.0], [max_lat, max_lng - 360.0]),
        ]
    } else {
        vec![AABB::from_corners([min_lat, min_lng], [max_lat, max_lng])]
    }
}

/// Sort order for `nearby` results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NearbySort {
    #[default]
    Distance,
    Popularity,
    Rating,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    pub center: Location,
    pub radius: f64,
    pub filter: PoiFilter,
    pub sort: NearbySort,
    pub limit: Option<usize>,
}

impl NearbyQuery {
    pub fn new(center: Location, radius: f64) -> Self {
        Self { center, radius, filter: PoiFilter::default(), sort: NearbySort::Distance, limit: None }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.filter = PoiFilter::category(category);
        self
    }

    pub fn with_sort(mut self, sort: NearbySort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Ranked POI annotated for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyPoi {
    #[serde(flatten)]
    pub poi: PointOfInterest,
    pub distance: f64,
    pub bearing: f64,
    pub direction: CompassDirection,
    pub estimated_walk_minutes: f64,
}

/// Shared handle to the current catalog snapshot
pub struct PointIndex {
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    walking_meters_per_minute: f64,
}

impl PointIndex {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::empty())),
            walking_meters_per_minute: DEFAULT_WALKING_METERS_PER_MINUTE,
        }
    }

    /// Index preloaded with `pois`
    pub fn with_pois(pois: Vec<PointOfInterest>, loaded_at_ms: u64) -> Self {
        let index = Self::new();
        index.refresh(pois, loaded_at_ms);
        index
    }

    pub fn with_walking_pace(mut self, meters_per_minute: f64) -> Self {
        self.walking_meters_per_minute = meters_per_minute;
        self
    }

    /// Current snapshot; stays valid even if a refresh happens meanwhile
    #[inline]
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().clone()
    }

    /// Replace the catalog wholesale, returns the number of POIs indexed
    pub fn refresh(&self, pois: Vec<PointOfInterest>, loaded_at_ms: u64) -> usize {
        let received = pois.len();
        let snapshot = Arc::new(CatalogSnapshot::build(pois, loaded_at_ms));
        let indexed = snapshot.len();
        *self.snapshot.write() = snapshot;

        info!(received = %received, indexed = %indexed, "catalog_snapshot_swapped");
        indexed
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    /// Epoch ms of the last successful refresh, None if never loaded
    pub fn last_refresh_ms(&self) -> Option<u64> {
        self.snapshot.read().loaded_at_ms()
    }

    /// Radius query with display annotations and ranking
    pub fn nearby(&self, query: &NearbyQuery) -> Vec<NearbyPoi> {
        let snapshot = self.snapshot();
        let mut results: Vec<NearbyPoi> = snapshot
            .query(query.center, query.radius, Some(&query.filter))
            .into_iter()
            .map(|hit| NearbyPoi {
                poi: hit.poi.clone(),
                distance: hit.distance,
                bearing: hit.bearing,
                direction: geo::compass_direction(hit.bearing),
                estimated_walk_minutes: geo::walking_minutes(
                    hit.distance,
                    self.walking_meters_per_minute,
                ),
            })
            .collect();

        match query.sort {
            // Already nearest first
            NearbySort::Distance => {}
            NearbySort::Popularity => results.sort_by(|a, b| {
                b.poi
                    .visit_profile
                    .popularity_score
                    .total_cmp(&a.poi.visit_profile.popularity_score)
                    .then_with(|| a.distance.total_cmp(&b.distance))
                    .then_with(|| a.poi.id.cmp(&b.poi.id))
            }),
            NearbySort::Rating => results.sort_by(|a, b| {
                let ra = a.poi.rating.unwrap_or(0.0);
                let rb = b.poi.rating.unwrap_or(0.0);
                rb.total_cmp(&ra)
                    .then_with(|| a.distance.total_cmp(&b.distance))
                    .then_with(|| a.poi.id.cmp(&b.poi.id))
            }),
        }

        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        results
    }
}

impl Default for PointIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTER: Location = Location::new(5.3257, -4.0267);

    fn poi_at(id: &str, bearing: f64, distance: f64, category: &str) -> PointOfInterest {
        PointOfInterest::new(id, geo::destination_point(CENTER, distance, bearing), category)
    }

    fn sample_catalog() -> Vec<PointOfInterest> {
        let mut museum = poi_at("museum", 0.0, 300.0, "museum");
        museum.visit_profile.popularity_score = 0.9;
        museum.rating = Some(4.1);
        let mut market = poi_at("market", 90.0, 120.0, "market");
        market.visit_profile.popularity_score = 0.4;
        market.rating = Some(4.8);
        let mut cathedral = poi_at("cathedral", 200.0, 800.0, "monument");
        cathedral.visit_profile.popularity_score = 0.7;
        let far = poi_at("far", 45.0, 5_000.0, "park");
        vec![museum, market, cathedral, far]
    }

    #[test]
    fn test_query_sorted_by_distance() {
        let snapshot = CatalogSnapshot::build(sample_catalog(), 1);
        let hits = snapshot.query(CENTER, 1_000.0, None);
        let ids: Vec<&str> = hits.iter().map(|h| h.poi.id.0.as_str()).collect();
        assert_eq!(ids, vec!["market", "museum", "cathedral"]);
        assert!((hits[0].distance - 120.0).abs() < 0.1);
        assert!((hits[0].bearing - 90.0).abs() < 0.1);
    }

    #[test]
    fn test_query_radius_boundary_and_filter() {
        let snapshot = CatalogSnapshot::build(sample_catalog(), 1);
        assert_eq!(snapshot.query(CENTER, 119.0, None).len(), 0);
        assert_eq!(snapshot.query(CENTER, 121.0, None).len(), 1);

        let filter = PoiFilter::category("MUSEUM");
        let hits = snapshot.query(CENTER, 10_000.0, Some(&filter));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].poi.id, PoiId::from("museum"));
    }

    #[test]
    fn test_nearest_k() {
        let snapshot = CatalogSnapshot::build(sample_catalog(), 1);
        let hits = snapshot.nearest_k(CENTER, 2, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].poi.id, PoiId::from("market"));
        assert_eq!(hits[1].poi.id, PoiId::from("museum"));
        assert_eq!(snapshot.nearest_k(CENTER, 10, None).len(), 4);
        assert!(snapshot.nearest_k(CENTER, 0, None).is_empty());
    }

    #[test]
    fn test_build_drops_invalid_and_duplicates() {
        let mut pois = sample_catalog();
        pois.push(PointOfInterest::new("museum", CENTER, "dupe"));
        pois.push(PointOfInterest::new("broken", Location::new(f64::NAN, 0.0), "x"));
        let snapshot = CatalogSnapshot::build(pois, 1);
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.get(&PoiId::from("museum")).unwrap().category, "museum");
        assert!(snapshot.get(&PoiId::from("broken")).is_none());
    }

    #[test]
    fn test_query_across_antimeridian() {
        let east = PointOfInterest::new("east", Location::new(0.0, 179.9995), "x");
        let west = PointOfInterest::new("west", Location::new(0.0, -179.9995), "x");
        let snapshot = CatalogSnapshot::build(vec![east, west], 1);
        let hits = snapshot.query(Location::new(0.0, 179.9999), 200.0, None);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_query_near_pole() {
        let a = PointOfInterest::new("a", Location::new(89.9999, 10.0), "x");
        let b = PointOfInterest::new("b", Location::new(89.9999, -170.0), "x");
        let snapshot = CatalogSnapshot::build(vec![a, b], 1);
        let hits = snapshot.query(Location::new(90.0, 0.0), 50.0, None);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_empty_index_degrades_to_no_results() {
        let index = PointIndex::new();
        assert!(index.last_refresh_ms().is_none());
        assert!(index.nearby(&NearbyQuery::new(CENTER, 10_000.0)).is_empty());
        assert!(index.snapshot().query(CENTER, 10_000.0, None).is_empty());
    }

    #[test]
    fn test_refresh_swaps_snapshot() {
        let index = PointIndex::with_pois(sample_catalog(), 100);
        let old = index.snapshot();
        assert_eq!(index.len(), 4);

        index.refresh(vec![poi_at("only", 0.0, 10.0, "x")], 200);
        assert_eq!(index.len(), 1);
        assert_eq!(index.last_refresh_ms(), Some(200));
        // Readers holding the old snapshot still see the old catalog
        assert_eq!(old.len(), 4);
    }

    #[test]
    fn test_nearby_sorts() {
        let index = PointIndex::with_pois(sample_catalog(), 1);
        let query = NearbyQuery::new(CENTER, 1_000.0);

        let by_distance = index.nearby(&query);
        assert_eq!(by_distance[0].poi.id, PoiId::from("market"));
        assert_eq!(by_distance[0].direction, CompassDirection::E);
        assert!((by_distance[0].estimated_walk_minutes - 120.0 / 83.0).abs() < 0.01);

        let by_popularity = index.nearby(&query.clone().with_sort(NearbySort::Popularity));
        assert_eq!(by_popularity[0].poi.id, PoiId::from("museum"));

        let by_rating = index.nearby(&query.clone().with_sort(NearbySort::Rating).with_limit(2));
        assert_eq!(by_rating.len(), 2);
        assert_eq!(by_rating[0].poi.id, PoiId::from("market"));
        assert_eq!(by_rating[1].poi.id, PoiId::from("museum"));
    }

    #[test]
    fn test_nearby_is_idempotent() {
        let index = PointIndex::with_pois(sample_catalog(), 1);
        let query = NearbyQuery::new(CENTER, 2_000.0).with_sort(NearbySort::Popularity);
        assert_eq!(index.nearby(&query), index.nearby(&query));
    }

    #[test]
    fn test_max_radius_and_resolve() {
        let mut pois = sample_catalog();
        pois[2].geofence.radius = 150.0;
        let snapshot = CatalogSnapshot::build(pois, 1);
        assert_eq!(snapshot.max_radius(), 150.0);

        let ids = vec![PoiId::from("cathedral"), PoiId::from("ghost"), PoiId::from("market")];
        let resolved = snapshot.resolve(&ids);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].id, PoiId::from("cathedral"));
    }

    #[test]
    fn test_nearby_sort_serde() {
        assert_eq!(serde_json::from_str::<NearbySort>("\"rating\"").unwrap(), NearbySort::Rating);
        assert!(serde_json::from_str::<NearbySort>("\"stars\"").is_err());
    }
}
