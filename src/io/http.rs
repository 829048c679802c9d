//! HTTP facade over the SessionCoordinator
//!
//! JSON in, JSON out (camelCase). Also serves `/health` and Prometheus
//! text at `/metrics`. Uses hyper http1 with one task per connection.

use crate::domain::error::CoreError;
use crate::domain::route::RouteConstraints;
use crate::domain::types::{Location, LocationSample, PoiId, SessionId};
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::coordinator::{RouteOrigin, SessionCoordinator};
use crate::services::movement::Velocity;
use crate::services::point_index::{NearbyQuery, NearbySort};
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shared by every request handler
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub site_id: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestBody {
    session_id: SessionId,
    sample: LocationSample,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeBody {
    #[serde(default)]
    session_id: Option<SessionId>,
    #[serde(default)]
    start_location: Option<Location>,
    #[serde(default)]
    candidate_poi_ids: Vec<PoiId>,
    #[serde(default)]
    constraints: RouteConstraints,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody<'a> {
    status: &'static str,
    catalog_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_refresh_ms: Option<u64>,
    sessions: usize,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
}

type HttpResponse = Response<Full<Bytes>>;

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(body)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "response_serialize_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", "serialization failed")
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> HttpResponse {
    let body = ErrorBody { error: message.into(), code };
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(bytes)))
        .expect("static response should not fail")
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
}

fn core_error_response(err: &CoreError) -> HttpResponse {
    let status = match err {
        CoreError::InvalidSample { .. } => StatusCode::BAD_REQUEST,
        CoreError::UnknownSession { .. } => StatusCode::NOT_FOUND,
        CoreError::NoLocation { .. } => StatusCode::CONFLICT,
        CoreError::CatalogUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, err.code(), err.to_string())
}

/// Largest request body accepted before answering 413
const MAX_BODY_BYTES: usize = 1 << 20;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// `GET /nearby` query string
#[derive(Debug, Deserialize)]
struct NearbyParams {
    lat: f64,
    lng: f64,
    radius: f64,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    sort: Option<NearbySort>,
    #[serde(default)]
    limit: Option<usize>,
}

impl NearbyParams {
    fn into_query(self) -> Result<NearbyQuery, String> {
        let center = Location::new(self.lat, self.lng);
        if !center.is_valid() {
            return Err("lat/lng out of range".to_string());
        }
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err("radius must be a finite value >= 0".to_string());
        }

        let mut query = NearbyQuery::new(center, self.radius);
        if let Some(category) = self.category.as_deref().filter(|c| !c.is_empty()) {
            query = query.with_category(category);
        }
        if let Some(sort) = self.sort {
            query = query.with_sort(sort);
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        Ok(query)
    }
}

/// Optional velocity override on `GET /sessions/{id}/prediction`
#[derive(Debug, Default, Deserialize)]
struct VelocityParams {
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    bearing: Option<f64>,
}

impl VelocityParams {
    fn into_velocity(self) -> Result<Option<Velocity>, String> {
        match (self.speed, self.bearing) {
            (Some(speed), Some(bearing)) if !speed.is_finite() || !bearing.is_finite() => {
                Err("speed and bearing must be finite".to_string())
            }
            (Some(speed), Some(bearing)) if speed >= 0.0 => Ok(Some(Velocity { speed, bearing })),
            (Some(_), Some(_)) => Err("speed must be >= 0".to_string()),
            (None, None) => Ok(None),
            _ => Err("speed and bearing must be given together".to_string()),
        }
    }
}

fn parse_params<T: DeserializeOwned>(query: Option<&str>) -> Result<T, String> {
    serde_urlencoded::from_str(query.unwrap_or_default()).map_err(|e| format!("invalid query: {e}"))
}

fn parse_nearby_query(query: Option<&str>) -> Result<NearbyQuery, String> {
    parse_params::<NearbyParams>(query)?.into_query()
}

fn parse_velocity(query: Option<&str>) -> Result<Option<Velocity>, String> {
    parse_params::<VelocityParams>(query)?.into_velocity()
}

async fn read_json<B, T>(body: B) -> Result<T, HttpResponse>
where
    B: Body,
    B::Error: Into<BoxError>,
    T: DeserializeOwned,
{
    let bytes = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "body_too_large",
                format!("request body exceeds {MAX_BODY_BYTES} bytes"),
            ));
        }
        Err(e) => return Err(bad_request(format!("failed to read body: {e}"))),
    };
    serde_json::from_slice(&bytes).map_err(|e| bad_request(format!("invalid JSON body: {e}")))
}

async fn handle_ingest<B>(body: B, state: &AppState) -> HttpResponse
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let request: IngestBody = match read_json(body).await {
        Ok(request) => request,
        Err(resp) => return resp,
    };
    match state.coordinator.ingest(&request.session_id, request.sample) {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(e) => core_error_response(&e),
    }
}

async fn handle_optimize<B>(body: B, state: &AppState) -> HttpResponse
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let request: OptimizeBody = match read_json(body).await {
        Ok(request) => request,
        Err(resp) => return resp,
    };
    let origin = match (request.session_id, request.start_location) {
        (Some(session_id), _) => RouteOrigin::Session(session_id),
        (None, Some(location)) => RouteOrigin::Location(location),
        (None, None) => return bad_request("sessionId or startLocation is required"),
    };

    // Matrix build is O(n²); keep it off the reactor threads
    let coordinator = state.coordinator.clone();
    let result = tokio::task::spawn_blocking(move || {
        coordinator.request_route(origin, request.candidate_poi_ids, request.constraints)
    })
    .await;

    match result {
        Ok(Ok(route)) => json_response(StatusCode::OK, &route),
        Ok(Err(e)) => core_error_response(&e),
        Err(e) => {
            error!(error = %e, "route_task_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", "route computation failed")
        }
    }
}

fn handle_health(state: &AppState) -> HttpResponse {
    let index = state.coordinator.index();
    let last_refresh_ms = index.last_refresh_ms();
    let body = HealthBody {
        status: if last_refresh_ms.is_some() { "ok" } else { "degraded" },
        catalog_size: index.len(),
        last_refresh_ms,
        sessions: state.coordinator.session_count(),
        version: &state.version,
    };
    json_response(StatusCode::OK, &body)
}

fn handle_metrics(state: &AppState) -> HttpResponse {
    let coordinator = &state.coordinator;
    let summary = coordinator.metrics().snapshot(coordinator.session_count(), coordinator.index().len());
    let body = format_prometheus_metrics(&summary, &state.site_id);
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Route one request; generic over the body so tests can pass `Full<Bytes>`
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<HttpResponse, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();
    let query = parts.uri.query();

    let decoded: Result<Vec<Cow<'_, str>>, _> =
        path.trim_matches('/').split('/').map(urlencoding::decode).collect();
    let Ok(decoded) = decoded else {
        return Ok(bad_request("path is not valid UTF-8"));
    };
    let segments: Vec<&str> = decoded.iter().map(|s| s.as_ref()).collect();

    let response = match (&parts.method, segments.as_slice()) {
        (&Method::POST, ["ingest"]) => handle_ingest(body, &state).await,
        (&Method::GET, ["nearby"]) => match parse_nearby_query(query) {
            Ok(query) => json_response(StatusCode::OK, &state.coordinator.nearby(&query)),
            Err(message) => bad_request(message),
        },
        (&Method::POST, ["routes", "optimize"]) => handle_optimize(body, &state).await,
        (&Method::GET, ["sessions", id]) => {
            match state.coordinator.current_state(&SessionId::from(*id)) {
                Ok(snapshot) => json_response(StatusCode::OK, &snapshot),
                Err(e) => core_error_response(&e),
            }
        }
        (&Method::DELETE, ["sessions", id]) => {
            match state.coordinator.evict(&SessionId::from(*id)) {
                Ok(()) => Response::builder()
                    .status(StatusCode::NO_CONTENT)
                    .header("Access-Control-Allow-Origin", "*")
                    .body(Full::new(Bytes::new()))
                    .expect("static response should not fail"),
                Err(e) => core_error_response(&e),
            }
        }
        (&Method::GET, ["sessions", id, "hotspots"]) => {
            match state.coordinator.hotspots(&SessionId::from(*id)) {
                Ok(hotspots) => json_response(StatusCode::OK, &hotspots),
                Err(e) => core_error_response(&e),
            }
        }
        (&Method::GET, ["sessions", id, "prediction"]) => match parse_velocity(query) {
            Ok(velocity) => {
                match state.coordinator.predict_path(&SessionId::from(*id), velocity) {
                    Ok(prediction) => json_response(StatusCode::OK, &prediction),
                    Err(e) => core_error_response(&e),
                }
            }
            Err(message) => bad_request(message),
        },
        (&Method::GET, ["health"]) => handle_health(&state),
        (&Method::GET, ["metrics"]) => handle_metrics(&state),
        // CORS preflight for browser clients
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"),
        _ => error_response(StatusCode::NOT_FOUND, "not_found", "Not Found"),
    };

    debug!(
        method = %parts.method,
        path = %path,
        status = %response.status().as_u16(),
        "http_request"
    );
    Ok(response)
}

/// Serve the facade until shutdown
pub async fn start_http_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("failed to bind HTTP facade on {addr}"))?;

    info!(addr = %addr, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                warn!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
