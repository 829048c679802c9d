//! Operations on the SessionCoordinator
//!
//! `ingest` is the per-sample hot path. Everything else is on-demand and
//! works from owned snapshots so analysis never holds a session lock long.

use super::{FenceView, IngestOutcome, RouteOrigin, SessionCoordinator, SessionSnapshot};
use crate::domain::error::CoreError;
use crate::domain::route::{RouteConstraints, RouteRequest, RouteResult};
use crate::domain::types::{LocationSample, PoiId, SessionId};
use crate::services::movement::{Hotspot, PathPrediction, Velocity};
use crate::services::point_index::{NearbyPoi, NearbyQuery};
use crate::services::track_recorder::TrackPoint;
use std::time::Instant;
use tracing::{debug, info, warn};

impl SessionCoordinator {
    /// Validate and apply one sample to its session
    ///
    /// The first sample for an unknown id creates the session. A rejected
    /// sample leaves every session untouched.
    pub fn ingest(
        &self,
        session_id: &SessionId,
        sample: LocationSample,
    ) -> Result<IngestOutcome, CoreError> {
        let started = Instant::now();

        if let Err(e) = sample.validate() {
            self.metrics.record_sample_rejected();
            warn!(session_id = %session_id, error = %e, "sample_rejected");
            return Err(e);
        }

        let catalog = self.index.snapshot();
        let slot = self.pin_or_create(session_id);
        let mut session = self.lock_for_write(&slot);

        let sequence = session.sequence + 1;
        let appended = session.track.append(sample.clone(), sequence).map(|_| ());
        if let Err(e) = appended {
            self.metrics.record_sample_rejected();
            warn!(session_id = %session_id, error = %e, "sample_rejected");
            return Err(e);
        }
        session.sequence = sequence;
        slot.touch(self.clock.now_ms());

        let session = &mut *session;
        let events =
            self.geofence.evaluate(session_id, &sample, sequence, &catalog, &mut session.fences);
        let summary = self.movement.classify(&session.track.recent(self.movement.window()));
        if summary.pattern != session.movement.pattern {
            debug!(
                session_id = %session_id,
                from = %session.movement.pattern.as_str(),
                to = %summary.pattern.as_str(),
                "movement_pattern_changed"
            );
        }
        session.movement = summary;

        for event in &events {
            self.metrics.record_geofence_event(event.event_type);
        }
        if let Some(ref sender) = self.egress_sender {
            sender.send_events(&events);
        }

        let latency_us = started.elapsed().as_micros() as u64;
        self.metrics.record_sample_ingested(latency_us);

        Ok(IngestOutcome { events: events.into_vec(), movement_pattern: summary.pattern, sequence })
    }

    /// Diagnostic copy of a session
    pub fn current_state(&self, session_id: &SessionId) -> Result<SessionSnapshot, CoreError> {
        let slot = self.slot(session_id).ok_or_else(|| CoreError::unknown_session(session_id))?;
        let session = slot.state.lock();

        let mut fences: Vec<FenceView> = session
            .fences
            .iter()
            .map(|(poi_id, status)| FenceView {
                poi_id: poi_id.clone(),
                state: status.state,
                entered_at: status.entered_at,
            })
            .collect();
        fences.sort_by(|a, b| a.poi_id.cmp(&b.poi_id));

        Ok(SessionSnapshot {
            session_id: session.id.clone(),
            sequence: session.sequence,
            sample_count: session.track.len(),
            current_location: session.current_location(),
            fences,
            movement: session.movement,
            created_at_ms: session.created_at_ms,
            last_seen_ms: slot.last_seen_ms(),
            track: session.track.snapshot(),
        })
    }

    /// Drop a session and all of its state
    pub fn evict(&self, session_id: &SessionId) -> Result<(), CoreError> {
        match self.sessions.write().remove(session_id) {
            Some(_) => {
                self.metrics.record_sessions_evicted(1);
                info!(session_id = %session_id, "session_evicted");
                Ok(())
            }
            None => Err(CoreError::unknown_session(session_id)),
        }
    }

    /// Evict every session idle longer than the timeout, returns evicted ids
    pub fn evict_idle(&self) -> Vec<SessionId> {
        let now_ms = self.clock.now_ms();
        let timeout_ms = self.idle_timeout_ms;

        let mut evicted = Vec::new();
        self.sessions.write().retain(|id, slot| {
            let idle_ms = now_ms.saturating_sub(slot.last_seen_ms());
            if idle_ms > timeout_ms && !slot.is_pinned() {
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });

        if !evicted.is_empty() {
            evicted.sort();
            self.metrics.record_sessions_evicted(evicted.len() as u64);
            info!(
                count = %evicted.len(),
                remaining = %self.session_count(),
                "idle_sessions_evicted"
            );
        }
        evicted
    }

    /// Build a route from a session's last fix or an explicit location
    pub fn request_route(
        &self,
        origin: RouteOrigin,
        candidate_poi_ids: Vec<PoiId>,
        constraints: RouteConstraints,
    ) -> Result<RouteResult, CoreError> {
        let start_location = match origin {
            RouteOrigin::Location(location) => {
                if !location.is_valid() {
                    return Err(CoreError::invalid_sample("route start location out of range"));
                }
                location
            }
            RouteOrigin::Session(session_id) => {
                let slot =
                    self.slot(&session_id).ok_or_else(|| CoreError::unknown_session(&session_id))?;
                let location = slot.state.lock().current_location();
                location.ok_or(CoreError::NoLocation { session_id })?
            }
        };

        let request = RouteRequest { start_location, candidate_poi_ids, constraints };
        let catalog = self.index.snapshot();
        let result = self.optimizer.optimize_request(&request, &catalog);
        self.metrics.record_route(result.status, result.budget_exceeded);
        Ok(result)
    }

    /// Radius search over the current catalog
    pub fn nearby(&self, query: &NearbyQuery) -> Vec<NearbyPoi> {
        self.index.nearby(query)
    }

    /// Cluster the session's retained track into hotspots
    pub fn hotspots(&self, session_id: &SessionId) -> Result<Vec<Hotspot>, CoreError> {
        let track = self.track_snapshot(session_id)?;
        Ok(self.movement.hotspots(&track))
    }

    /// Short-horizon projection of where the session is heading
    pub fn predict_path(
        &self,
        session_id: &SessionId,
        velocity: Option<Velocity>,
    ) -> Result<PathPrediction, CoreError> {
        let track = self.track_snapshot(session_id)?;
        Ok(self.movement.predict(&track, self.clock.now_ms(), velocity))
    }

    fn track_snapshot(&self, session_id: &SessionId) -> Result<Vec<TrackPoint>, CoreError> {
        let slot = self.slot(session_id).ok_or_else(|| CoreError::unknown_session(session_id))?;
        let track = slot.state.lock().track.snapshot();
        Ok(track)
    }
}
