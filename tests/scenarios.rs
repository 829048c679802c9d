//! End-to-end scenarios through the public SessionCoordinator API

use guide_tracker::domain::{
    geo, CoreError, GeofenceEventType, Location, LocationSample, MovementPattern, PointOfInterest,
    RouteConstraints, RouteStatus, SessionId,
};
use guide_tracker::infra::{Config, ManualClock, Metrics};
use guide_tracker::io::{create_egress_channel, Egress};
use guide_tracker::services::{NearbyQuery, PointIndex, RouteOrigin, SessionCoordinator};
use std::sync::Arc;
use tempfile::tempdir;

const PLATEAU: Location = Location::new(5.3257, -4.0267);
const T0: u64 = 1_700_000_000_000;

fn coordinator_with(pois: Vec<PointOfInterest>, config: Config) -> SessionCoordinator {
    let clock = Arc::new(ManualClock::new(T0));
    let index = Arc::new(PointIndex::with_pois(pois, T0));
    SessionCoordinator::new(&config, index, clock, Arc::new(Metrics::new()))
}

fn plateau_only() -> SessionCoordinator {
    coordinator_with(vec![PointOfInterest::new("plateau", PLATEAU, "district")], Config::default())
}

fn at(distance: f64, bearing: f64, accuracy: f64, ts: u64) -> LocationSample {
    LocationSample::at(geo::destination_point(PLATEAU, distance, bearing), accuracy, ts)
}

#[test]
fn test_worse_fix_inside_fence_changes_nothing() {
    let coordinator = plateau_only();
    let session = SessionId::from("visitor");

    let first = coordinator.ingest(&session, at(40.0, 0.0, 10.0, T0)).unwrap();
    assert_eq!(first.events.len(), 1);
    assert_eq!(first.events[0].event_type, GeofenceEventType::Enter);

    let second = coordinator.ingest(&session, at(40.0, 0.0, 30.0, T0 + 5_000)).unwrap();
    assert!(second.events.is_empty());

    let snapshot = coordinator.current_state(&session).unwrap();
    assert_eq!(snapshot.inside_poi_ids().len(), 1);
}

#[test]
fn test_route_stops_when_budget_covers_two_of_three() {
    let pois: Vec<PointOfInterest> = [("first", 500.0), ("second", 1_000.0), ("third", 1_500.0)]
        .iter()
        .map(|(id, d)| PointOfInterest::new(id, geo::destination_point(PLATEAU, *d, 90.0), "sight"))
        .collect();
    let coordinator = coordinator_with(pois, Config::default());

    // 2 x (500 m walk + 30 min visit) is just over 72 minutes
    let constraints = RouteConstraints::default().with_max_duration(75.0);
    let route = coordinator
        .request_route(
            RouteOrigin::Location(PLATEAU),
            vec!["third".into(), "first".into(), "second".into()],
            constraints,
        )
        .unwrap();

    assert_eq!(route.stops.len(), 2);
    let ids: Vec<&str> = route.stops.iter().map(|s| s.poi_id.0.as_str()).collect();
    assert_eq!(ids, vec!["first", "second"]);
    assert_eq!(route.status, RouteStatus::Partial);
    assert!(route.total_duration_minutes <= 75.0);
}

#[test]
fn test_jitter_in_place_is_stationary() {
    let coordinator = plateau_only();
    let session = SessionId::from("bench");

    let mut last = None;
    for (i, bearing) in [0.0, 90.0, 180.0, 270.0, 45.0].iter().enumerate() {
        let sample = at(4.0, *bearing, 5.0, T0 + i as u64 * 30_000);
        last = Some(coordinator.ingest(&session, sample).unwrap());
    }

    assert_eq!(last.unwrap().movement_pattern, MovementPattern::Stationary);
}

#[test]
fn test_boundary_oscillation_does_not_flap() {
    let coordinator = plateau_only();
    let session = SessionId::from("edge");

    let mut enters = 0;
    let mut exits = 0;
    for i in 0..10u64 {
        let distance = if i % 2 == 0 { 49.0 } else { 51.0 };
        let outcome = coordinator.ingest(&session, at(distance, 90.0, 5.0, T0 + i * 1_000)).unwrap();
        for event in outcome.events {
            match event.event_type {
                GeofenceEventType::Enter => enters += 1,
                GeofenceEventType::Exit => exits += 1,
                GeofenceEventType::Dwell => {}
            }
        }
    }
    assert_eq!((enters, exits), (1, 0));

    // A genuine crossing beyond the 1.1x exit radius
    let outcome = coordinator.ingest(&session, at(60.0, 90.0, 5.0, T0 + 20_000)).unwrap();
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].event_type, GeofenceEventType::Exit);
}

#[test]
fn test_empty_route_is_vacuously_perfect() {
    let coordinator = plateau_only();
    let route = coordinator
        .request_route(RouteOrigin::Location(PLATEAU), Vec::new(), RouteConstraints::default())
        .unwrap();

    assert!(route.stops.is_empty());
    assert_eq!(route.total_distance, 0.0);
    assert_eq!(route.optimization_score, 1.0);
    assert_eq!(route.status, RouteStatus::Empty);
}

#[test]
fn test_single_reachable_candidate() {
    let museum = PointOfInterest::new("museum", geo::destination_point(PLATEAU, 300.0, 45.0), "museum");
    let coordinator = coordinator_with(vec![museum], Config::default());

    let route = coordinator
        .request_route(
            RouteOrigin::Location(PLATEAU),
            vec!["museum".into()],
            RouteConstraints::default().with_max_duration(60.0),
        )
        .unwrap();

    assert_eq!(route.stops.len(), 1);
    assert_eq!(route.stops[0].poi_id.0, "museum");
    assert_eq!(route.status, RouteStatus::Complete);
}

#[test]
fn test_nearby_is_stable_across_calls() {
    let pois = (0..8)
        .map(|i| {
            let location = geo::destination_point(PLATEAU, 100.0 * (i + 1) as f64, 40.0 * i as f64);
            PointOfInterest::new(&format!("poi-{i}"), location, "sight")
        })
        .collect();
    let coordinator = coordinator_with(pois, Config::default());
    let query = NearbyQuery::new(PLATEAU, 650.0);

    let first = coordinator.nearby(&query);
    let second = coordinator.nearby(&query);

    assert_eq!(first.len(), 6);
    assert_eq!(first, second);
    assert!(first.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn test_timestamp_regression_rejected() {
    let coordinator = plateau_only();
    let session = SessionId::from("late");

    coordinator.ingest(&session, at(500.0, 0.0, 5.0, T0 + 10_000)).unwrap();
    let err = coordinator.ingest(&session, at(400.0, 0.0, 5.0, T0 + 10_000)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidSample { .. }));

    let err = coordinator.ingest(&session, at(300.0, 0.0, 5.0, T0 + 5_000)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidSample { .. }));

    assert_eq!(coordinator.current_state(&session).unwrap().sample_count, 1);
}

#[test]
fn test_track_never_exceeds_capacity() {
    let coordinator = coordinator_with(
        vec![PointOfInterest::new("plateau", PLATEAU, "district")],
        Config::default().with_retention(10, 30),
    );
    let session = SessionId::from("long-walk");

    for i in 0..25u64 {
        coordinator.ingest(&session, at(10.0 * i as f64, 90.0, 5.0, T0 + i * 1_000)).unwrap();
        assert!(coordinator.current_state(&session).unwrap().sample_count <= 10);
    }

    let snapshot = coordinator.current_state(&session).unwrap();
    assert_eq!(snapshot.sample_count, 10);
    assert_eq!(snapshot.sequence, 25);
}

#[tokio::test]
async fn test_events_written_as_jsonl() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events").join("geofence.jsonl");

    let metrics = Arc::new(Metrics::new());
    let (sender, rx) = create_egress_channel(16, metrics.clone());
    let writer = tokio::spawn(Egress::new(path.to_str().unwrap()).run(rx));

    let index = Arc::new(PointIndex::with_pois(
        vec![PointOfInterest::new("plateau", PLATEAU, "district")],
        T0,
    ));
    let coordinator =
        SessionCoordinator::new(&Config::default(), index, Arc::new(ManualClock::new(T0)), metrics)
            .with_egress(sender);

    let session = SessionId::from("writer");
    coordinator.ingest(&session, at(10.0, 0.0, 5.0, T0)).unwrap();
    coordinator.ingest(&session, at(200.0, 0.0, 5.0, T0 + 60_000)).unwrap();

    // Dropping the coordinator closes the channel and stops the writer
    drop(coordinator);
    writer.await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> =
        content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["type"], "enter");
    assert_eq!(lines[1]["type"], "exit");
    assert_eq!(lines[1]["sessionId"], "writer");
}
