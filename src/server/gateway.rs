//! Admission gateway
//!
//! Decides per request whether to attach a listener, redirect it to the
//! fallback relay, or answer with status or static content. It only talks to
//! the registry and the counters, never to the upstream client.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use bytes::Bytes;
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;

use crate::registry::AdmissionError;
use crate::relay::RelayState;
use crate::server::config::RelayConfig;
use crate::stats::PeakRecord;

/// Path listeners attach to
pub const STREAM_PATH: &str = "/all.mp3";

const AUDIO_MPEG: &str = "audio/mpeg";

/// Header carrying the client address behind a proxy
const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Clone)]
struct GatewayState {
    relay: Arc<RelayState>,
    crossdomain: Bytes,
}

/// Status report served at `/`
#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    listeners: usize,
    bytes_in_month: u64,
    bytes_out_month: u64,
    started_at: i64,
    upstream: &'static str,
    config: &'a RelayConfig,
    peaks: PeakRecord,
}

/// Build the gateway router
pub fn router(relay: Arc<RelayState>, crossdomain: Bytes) -> Router {
    with_fault_handling(routes(), GatewayState { relay, crossdomain })
}

fn routes() -> Router<GatewayState> {
    Router::new()
        .route(
            STREAM_PATH,
            get(attach_listener)
                .head(probe_admission)
                .fallback(empty_ok),
        )
        .route("/", any(status))
        .route("/crossdomain.xml", any(crossdomain_policy))
        .fallback(empty_ok)
}

/// Contain handler panics as `500` responses, then attach state
fn with_fault_handling(routes: Router<GatewayState>, state: GatewayState) -> Router {
    routes
        .layer(CatchPanicLayer::custom(handler_fault))
        .with_state(state)
}

/// Address to log for a request
///
/// First entry of `X-Forwarded-For` if present, otherwise the socket peer.
pub fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_owned())
}

fn redirect(relay: &RelayState, remote: &str, reason: &AdmissionError) -> Response {
    let location = relay.config().fallback_url.clone();
    tracing::info!(
        remote = %remote,
        reason = %reason,
        location = %location,
        "Redirecting listener"
    );

    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

async fn attach_listener(
    State(state): State<GatewayState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let remote = client_addr(&headers, peer.map(|ConnectInfo(addr)| addr));

    match state.relay.registry().admit(remote.as_str()) {
        Ok(stream) => (
            [(header::CONTENT_TYPE, AUDIO_MPEG)],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(reason) => redirect(&state.relay, &remote, &reason),
    }
}

async fn probe_admission(
    State(state): State<GatewayState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let registry = state.relay.registry();

    if registry.has_capacity() {
        ([(header::CONTENT_TYPE, AUDIO_MPEG)], Body::empty()).into_response()
    } else {
        let remote = client_addr(&headers, peer.map(|ConnectInfo(addr)| addr));
        let reason = AdmissionError::CapacityExceeded {
            limit: registry.limit(),
        };
        redirect(&state.relay, &remote, &reason)
    }
}

async fn status(State(state): State<GatewayState>) -> Response {
    let relay = &state.relay;
    relay.stats().observe_bytes_sent_peak();
    let snapshot = relay.stats().snapshot();

    let report = StatusReport {
        listeners: relay.registry().count(),
        bytes_in_month: snapshot.bytes_received,
        bytes_out_month: snapshot.bytes_sent,
        started_at: snapshot.started_at,
        upstream: relay.connection_state().as_str(),
        config: relay.config(),
        peaks: PeakRecord {
            listeners: snapshot.peak_listeners,
            bytes_out_month: snapshot.peak_bytes_sent,
        },
    };

    Json(report).into_response()
}

async fn crossdomain_policy(State(state): State<GatewayState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/xml")],
        state.crossdomain.clone(),
    )
        .into_response()
}

async fn empty_ok() -> StatusCode {
    StatusCode::OK
}

fn handler_fault(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    };

    tracing::error!(error = %message, "Request handler panicked");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
