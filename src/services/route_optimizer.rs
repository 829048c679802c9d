//! Constrained nearest-neighbor route builder
//!
//! Candidates are filtered by category preference and crowd avoidance, then a
//! greedy walk from the start picks the best-scoring stop that still fits the
//! duration budget. An optional 2-opt pass shortens the result afterwards.
//! Work is bounded by a wall-clock budget that grows with the candidate count;
//! when it runs out the route built so far is returned.

use crate::domain::geo;
use crate::domain::route::{RouteConstraints, RouteRequest, RouteResult, RouteStatus, RouteStop};
use crate::domain::types::{CrowdLevel, Location, PointOfInterest};
use crate::services::point_index::CatalogSnapshot;
use rustc_hash::FxHashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DISTANCE_WEIGHT: f64 = 0.4;
const POPULARITY_WEIGHT: f64 = 0.4;
const TIME_OF_DAY_WEIGHT: f64 = 0.2;

/// Upper bound on full 2-opt sweeps
const MAX_TWO_OPT_PASSES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub walking_meters_per_minute: f64,
    pub compute_budget_base_ms: u64,
    pub compute_budget_per_candidate_ms: u64,
    pub compute_budget_max_ms: u64,
    pub two_opt: bool,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            walking_meters_per_minute: 83.0,
            compute_budget_base_ms: 50,
            compute_budget_per_candidate_ms: 2,
            compute_budget_max_ms: 500,
            two_opt: true,
        }
    }
}

impl OptimizerSettings {
    /// Wall-clock budget for `candidates` candidates
    pub fn compute_budget(&self, candidates: usize) -> Duration {
        let ms = self
            .compute_budget_base_ms
            .saturating_add(self.compute_budget_per_candidate_ms.saturating_mul(candidates as u64))
            .min(self.compute_budget_max_ms);
        Duration::from_millis(ms)
    }
}

/// Crowd penalty by hour: 11:00-15:59 is peak
pub fn time_of_day_score(crowd: CrowdLevel, hour: Option<u8>) -> f64 {
    let Some(hour) = hour else {
        return 1.0;
    };
    let peak = (11..=15).contains(&hour);
    match (crowd, peak) {
        (CrowdLevel::Low, _) => 1.0,
        (CrowdLevel::Medium, true) => 0.7,
        (CrowdLevel::Medium, false) => 0.9,
        (CrowdLevel::High, true) => 0.4,
        (CrowdLevel::High, false) => 0.8,
    }
}

/// Closer is better; 1 at 0 m, 0.5 at 1 km
#[inline]
pub fn distance_score(meters: f64) -> f64 {
    1.0 / (1.0 + meters / 1000.0)
}

struct Deadline {
    at: Instant,
    hit: bool,
    /// Forces expiry after this many checks
    #[cfg(test)]
    checks_left: Option<usize>,
}

impl Deadline {
    fn new(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            hit: false,
            #[cfg(test)]
            checks_left: None,
        }
    }

    fn expired(&mut self) -> bool {
        #[cfg(test)]
        if let Some(left) = self.checks_left.as_mut() {
            if *left == 0 {
                self.hit = true;
            } else {
                *left -= 1;
            }
        }
        if !self.hit && Instant::now() >= self.at {
            self.hit = true;
        }
        self.hit
    }
}

pub struct RouteOptimizer {
    settings: OptimizerSettings,
}

impl RouteOptimizer {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// Resolve the request's ids against `catalog` and optimize
    pub fn optimize_request(&self, request: &RouteRequest, catalog: &CatalogSnapshot) -> RouteResult {
        let candidates = catalog.resolve(&request.candidate_poi_ids);
        let skipped = request.candidate_poi_ids.len() - candidates.len();
        if skipped > 0 {
            warn!(skipped = %skipped, "route_candidates_unknown");
        }
        self.optimize(request.start_location, &candidates, &request.constraints)
    }

    pub fn optimize(
        &self,
        start: Location,
        candidates: &[&PointOfInterest],
        constraints: &RouteConstraints,
    ) -> RouteResult {
        // Dedupe by id keeping request order, then apply filters
        let mut seen = FxHashSet::default();
        let pool: Vec<&PointOfInterest> = candidates
            .iter()
            .copied()
            .filter(|p| seen.insert(p.id.clone()))
            .filter(|p| constraints.prefers(&p.category))
            .filter(|p| !(constraints.avoid_crowds && p.visit_profile.crowd_level == CrowdLevel::High))
            .collect();

        if pool.is_empty() {
            debug!(supplied = %candidates.len(), "route_empty_candidate_set");
            return RouteResult::empty(RouteStatus::Empty);
        }

        let mut deadline = Deadline::new(self.settings.compute_budget(pool.len()));
        self.build_route(start, &pool, constraints, &mut deadline)
    }

    /// Matrix, greedy construction and 2-opt over an already filtered pool
    fn build_route(
        &self,
        start: Location,
        pool: &[&PointOfInterest],
        constraints: &RouteConstraints,
        deadline: &mut Deadline,
    ) -> RouteResult {
        let started = Instant::now();

        // Node 0 is the start, node i is pool[i - 1]
        let nodes: Vec<Location> =
            std::iter::once(start).chain(pool.iter().map(|p| p.location())).collect();
        let Some(matrix) = distance_matrix(&nodes, deadline) else {
            warn!(candidates = %pool.len(), "route_budget_exceeded_building_matrix");
            let mut result = RouteResult::empty(RouteStatus::Partial);
            result.optimization_score = 0.0;
            result.budget_exceeded = true;
            return result;
        };

        let mut order = self.greedy(pool, &matrix, constraints, deadline);

        if order.is_empty() {
            let status = if deadline.hit { RouteStatus::Partial } else { RouteStatus::Infeasible };
            info!(candidates = %pool.len(), status = %status.as_str(), "route_no_stops");
            let mut result = RouteResult::empty(status);
            result.optimization_score = 0.0;
            result.budget_exceeded = deadline.hit;
            return result;
        }

        if self.settings.two_opt && order.len() > 2 && !deadline.hit {
            self.two_opt(&mut order, pool, &matrix, constraints, deadline);
        }

        let status = if order.len() == pool.len() {
            RouteStatus::Complete
        } else {
            RouteStatus::Partial
        };
        let result = self.assemble(start, &order, pool, &matrix, constraints, status, deadline.hit);

        info!(
            candidates = %pool.len(),
            stops = %result.stops.len(),
            status = %status.as_str(),
            distance_m = %format!("{:.0}", result.total_distance),
            duration_min = %format!("{:.1}", result.total_duration_minutes),
            score = %format!("{:.3}", result.optimization_score),
            elapsed_us = %started.elapsed().as_micros(),
            "route_optimized"
        );
        result
    }

    fn travel_minutes(&self, meters: f64) -> f64 {
        geo::walking_minutes(meters, self.settings.walking_meters_per_minute)
    }

    /// Greedy construction, returns node indices (1-based into the matrix)
    fn greedy(
        &self,
        pool: &[&PointOfInterest],
        matrix: &[Vec<f64>],
        constraints: &RouteConstraints,
        deadline: &mut Deadline,
    ) -> Vec<usize> {
        let mut visited = vec![false; pool.len() + 1];
        let mut order = Vec::with_capacity(pool.len());
        let mut current = 0;
        let mut elapsed = 0.0;

        while order.len() < pool.len() {
            if deadline.expired() {
                warn!(stops = %order.len(), "route_budget_exceeded");
                break;
            }

            let mut best: Option<(usize, f64, f64)> = None;
            for node in 1..=pool.len() {
                if visited[node] {
                    continue;
                }
                let poi = pool[node - 1];
                let meters = matrix[current][node];
                let cost = self.travel_minutes(meters) + poi.visit_profile.optimal_visit_duration_minutes;
                if let Some(max) = constraints.max_duration_minutes {
                    if elapsed + cost > max {
                        continue;
                    }
                }
                let score = DISTANCE_WEIGHT * distance_score(meters)
                    + POPULARITY_WEIGHT * poi.visit_profile.popularity_score.clamp(0.0, 1.0)
                    + TIME_OF_DAY_WEIGHT
                        * time_of_day_score(poi.visit_profile.crowd_level, constraints.time_of_day_hour);
                // Strictly greater keeps the earliest candidate on ties
                if best.map_or(true, |(_, s, _)| score > s) {
                    best = Some((node, score, cost));
                }
            }

            let Some((node, _, cost)) = best else {
                break;
            };
            visited[node] = true;
            order.push(node);
            elapsed += cost;
            current = node;
        }

        order
    }

    /// Reverse segments while that shortens the path and stays within budget
    fn two_opt(
        &self,
        order: &mut [usize],
        pool: &[&PointOfInterest],
        matrix: &[Vec<f64>],
        constraints: &RouteConstraints,
        deadline: &mut Deadline,
    ) {
        let visit_minutes: f64 = order
            .iter()
            .map(|&n| pool[n - 1].visit_profile.optimal_visit_duration_minutes)
            .sum();
        let m = order.len();

        for _ in 0..MAX_TWO_OPT_PASSES {
            let mut improved = false;
            for i in 0..m - 1 {
                for j in i + 1..m {
                    if deadline.expired() {
                        return;
                    }
                    let prev = if i == 0 { 0 } else { order[i - 1] };
                    let before = matrix[prev][order[i]]
                        + if j + 1 < m { matrix[order[j]][order[j + 1]] } else { 0.0 };
                    let after = matrix[prev][order[j]]
                        + if j + 1 < m { matrix[order[i]][order[j + 1]] } else { 0.0 };

                    if after + 1e-9 < before {
                        order[i..=j].reverse();
                        let duration = self.travel_minutes(path_length(order, matrix)) + visit_minutes;
                        if constraints.max_duration_minutes.map_or(true, |max| duration <= max) {
                            improved = true;
                        } else {
                            order[i..=j].reverse();
                        }
                    }
                }
            }
            if !improved {
                break;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        start: Location,
        order: &[usize],
        pool: &[&PointOfInterest],
        matrix: &[Vec<f64>],
        constraints: &RouteConstraints,
        status: RouteStatus,
        budget_exceeded: bool,
    ) -> RouteResult {
        let mut stops = Vec::with_capacity(order.len());
        let mut previous = 0;
        let mut cumulative = 0.0;
        let mut total_distance = 0.0;
        let mut total_travel = 0.0;
        let mut total_visit = 0.0;

        for (i, &node) in order.iter().enumerate() {
            let poi = pool[node - 1];
            let meters = matrix[previous][node];
            let travel = self.travel_minutes(meters);
            let visit = poi.visit_profile.optimal_visit_duration_minutes;
            cumulative += travel + visit;
            total_distance += meters;
            total_travel += travel;
            total_visit += visit;

            stops.push(RouteStop {
                poi_id: poi.id.clone(),
                name: poi.name.clone(),
                category: poi.category.clone(),
                order: i + 1,
                travel_distance_from_previous: meters,
                estimated_travel_minutes: travel,
                visit_minutes: visit,
                cumulative_minutes: cumulative,
            });
            previous = node;
        }

        let total_duration = total_travel + total_visit;
        let last = pool[order[order.len() - 1] - 1].location();
        let direct = geo::distance_meters(start, last);

        let distance_efficiency = if total_distance > 0.0 {
            (direct / total_distance).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let time_efficiency = match constraints.max_duration_minutes {
            Some(max) if max > 0.0 => (1.0 - (total_duration - max).abs() / max).clamp(0.0, 1.0),
            _ => 1.0,
        };
        let preference_match = if constraints.preferred_categories.is_empty() {
            1.0
        } else {
            let matching = stops.iter().filter(|s| constraints.prefers(&s.category)).count();
            matching as f64 / stops.len() as f64
        };

        RouteResult {
            stops,
            total_distance,
            total_travel_minutes: total_travel,
            total_visit_minutes: total_visit,
            total_duration_minutes: total_duration,
            optimization_score: (distance_efficiency + time_efficiency + preference_match) / 3.0,
            status,
            budget_exceeded,
        }
    }
}

impl Default for RouteOptimizer {
    fn default() -> Self {
        Self::new(OptimizerSettings::default())
    }
}

/// Symmetric pairwise distances; None if the deadline passed mid-build
fn distance_matrix(nodes: &[Location], deadline: &mut Deadline) -> Option<Vec<Vec<f64>>> {
    let n = nodes.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        if deadline.expired() {
            return None;
        }
        for j in i + 1..n {
            let d = geo::distance_meters(nodes[i], nodes[j]);
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    Some(matrix)
}

/// Path length from the start node through `order`
fn path_length(order: &[usize], matrix: &[Vec<f64>]) -> f64 {
    let mut previous = 0;
    let mut total = 0.0;
    for &node in order {
        total += matrix[previous][node];
        previous = node;
    }
    total
}
