//! Per-session state ownership and the single ingest entry point
//!
//! The SessionCoordinator owns every session and coordinates:
//! - Track recording (strictly ordered, bounded ring buffer)
//! - Geofence evaluation against the current catalog snapshot
//! - Movement classification, hotspots and path prediction
//! - Route requests starting from a session's last fix
//!
//! Sessions sit behind their own mutex so different sessions ingest in
//! parallel while calls for the same session are serialized.

mod handlers;

use crate::domain::types::{GeofenceEvent, Location, MovementPattern, PoiId, SessionId};
use crate::infra::clock::Clock;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EventSender;
use crate::services::geofence::{FenceSet, FenceState, GeofenceEngine};
use crate::services::movement::{MovementAnalyzer, MovementSummary};
use crate::services::point_index::PointIndex;
use crate::services::route_optimizer::{OptimizerSettings, RouteOptimizer};
use crate::services::track_recorder::{RetentionPolicy, TrackPoint, TrackRecorder};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

/// Mutable state of one tracked session
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) track: TrackRecorder,
    pub(crate) fences: FenceSet,
    /// Sequence number of the last accepted sample
    pub(crate) sequence: u64,
    pub(crate) movement: MovementSummary,
    pub(crate) created_at_ms: u64,
}

impl Session {
    fn new(id: SessionId, retention: RetentionPolicy, now_ms: u64) -> Self {
        Self {
            id,
            track: TrackRecorder::new(retention),
            fences: FenceSet::new(),
            sequence: 0,
            movement: MovementSummary::default(),
            created_at_ms: now_ms,
        }
    }

    pub fn current_location(&self) -> Option<Location> {
        self.track.last().map(TrackPoint::location)
    }
}

/// Session plus the idle-eviction timestamp, readable without the mutex
pub(crate) struct SessionSlot {
    last_seen_ms: AtomicU64,
    /// Ingests currently holding this slot; idle eviction skips pinned slots
    pins: AtomicUsize,
    state: Mutex<Session>,
}

impl SessionSlot {
    fn touch(&self, now_ms: u64) {
        self.last_seen_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms.load(Ordering::Relaxed)
    }

    fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }
}

/// Keeps a slot out of idle eviction until dropped
pub(crate) struct SlotPin {
    slot: Arc<SessionSlot>,
}

impl SlotPin {
    /// Only called with the session map lock held
    fn new(slot: Arc<SessionSlot>) -> Self {
        slot.pins.fetch_add(1, Ordering::AcqRel);
        Self { slot }
    }
}

impl Deref for SlotPin {
    type Target = SessionSlot;

    fn deref(&self) -> &SessionSlot {
        &self.slot
    }
}

impl Drop for SlotPin {
    fn drop(&mut self) {
        self.slot.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Result of ingesting one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub events: Vec<GeofenceEvent>,
    pub movement_pattern: MovementPattern,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FenceView {
    pub poi_id: PoiId,
    pub state: FenceState,
    pub entered_at: u64,
}

/// Read-only copy of a session for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub sequence: u64,
    pub sample_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_location: Option<Location>,
    pub fences: Vec<FenceView>,
    pub movement: MovementSummary,
    pub created_at_ms: u64,
    pub last_seen_ms: u64,
    pub track: Vec<TrackPoint>,
}

impl SessionSnapshot {
    pub fn inside_poi_ids(&self) -> Vec<&PoiId> {
        self.fences.iter().map(|f| &f.poi_id).collect()
    }
}

/// Where a route starts
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOrigin {
    /// The session's most recent fix
    Session(SessionId),
    Location(Location),
}

/// Owner of all session state
pub struct SessionCoordinator {
    pub(crate) sessions: RwLock<FxHashMap<SessionId, Arc<SessionSlot>>>,
    pub(crate) index: Arc<PointIndex>,
    pub(crate) geofence: GeofenceEngine,
    pub(crate) movement: MovementAnalyzer,
    pub(crate) optimizer: RouteOptimizer,
    pub(crate) retention: RetentionPolicy,
    pub(crate) idle_timeout_ms: u64,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) egress_sender: Option<EventSender>,
}

impl SessionCoordinator {
    pub fn new(
        config: &Config,
        index: Arc<PointIndex>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let settings = OptimizerSettings {
            walking_meters_per_minute: config.walking_meters_per_minute(),
            compute_budget_base_ms: config.compute_budget_base_ms(),
            compute_budget_per_candidate_ms: config.compute_budget_per_candidate_ms(),
            compute_budget_max_ms: config.compute_budget_max_ms(),
            two_opt: config.two_opt(),
        };
        Self {
            sessions: RwLock::new(FxHashMap::default()),
            index,
            geofence: GeofenceEngine::new(config.hysteresis_factor()),
            movement: MovementAnalyzer::new(config.movement_window()),
            optimizer: RouteOptimizer::new(settings),
            retention: RetentionPolicy {
                max_samples: config.max_samples(),
                max_age_ms: config.retention_ms(),
            },
            idle_timeout_ms: config.idle_timeout_ms(),
            clock,
            metrics,
            egress_sender: None,
        }
    }

    /// Forward emitted events to the egress channel
    pub fn with_egress(mut self, sender: EventSender) -> Self {
        self.egress_sender = Some(sender);
        self
    }

    pub fn index(&self) -> &Arc<PointIndex> {
        &self.index
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub(crate) fn slot(&self, session_id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Pin the existing slot or a fresh one
    ///
    /// The pin is taken under the map lock, so idle eviction (which holds
    /// the write lock) can never remove a slot an ingest is about to use.
    /// `last_seen_ms` is left alone; ingest touches it once a sample is applied.
    pub(crate) fn pin_or_create(&self, session_id: &SessionId) -> SlotPin {
        if let Some(slot) = self.sessions.read().get(session_id) {
            return SlotPin::new(slot.clone());
        }

        let now_ms = self.clock.now_ms();
        let mut sessions = self.sessions.write();
        let slot = sessions.entry(session_id.clone()).or_insert_with(|| {
            self.metrics.record_session_created();
            info!(session_id = %session_id, "session_created");
            Arc::new(SessionSlot {
                last_seen_ms: AtomicU64::new(now_ms),
                pins: AtomicUsize::new(0),
                state: Mutex::new(Session::new(session_id.clone(), self.retention, now_ms)),
            })
        });
        SlotPin::new(slot.clone())
    }

    /// Lock a session for mutation; a held lock means a second writer
    pub(crate) fn lock_for_write<'a>(&self, slot: &'a SessionSlot) -> MutexGuard<'a, Session> {
        if let Some(guard) = slot.state.try_lock() {
            return guard;
        }
        self.metrics.record_writer_contention();
        let guard = slot.state.lock();
        warn!(session_id = %guard.id, "session_writer_contention");
        guard
    }

    /// Periodically evict sessions idle past the timeout until shutdown
    pub async fn run_idle_eviction(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = %period.as_secs(), "idle_eviction_started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evict_idle();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("idle_eviction_stopped");
    }
}
