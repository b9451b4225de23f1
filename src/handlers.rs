use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};

use crate::client_identifier::{ClientIdentifier, RequestSignals};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;
use crate::middleware::{generate_request_id, RequestId};
use crate::rate_limit_config::QuotaPolicy;
use crate::rate_limiter::{now_millis, RateLimitEngine};
use crate::response::{
    ConfigResponse, DecisionResponseBuilder, RateLimitSection, ServerSection,
};

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Everything a handler needs, passed explicitly rather than through globals.
pub struct AppState {
    pub engine: Arc<RateLimitEngine>,
    pub identifier: ClientIdentifier,
    pub policy: QuotaPolicy,
    pub metrics: MetricsCollector,
    pub health: HealthChecker,
    pub region: String,
    pub config_view: ConfigResponse,
}

impl AppState {
    pub fn new(
        engine: Arc<RateLimitEngine>,
        identifier: ClientIdentifier,
        policy: QuotaPolicy,
        region: String,
        server: ServerSection,
    ) -> Self {
        let config_view = ConfigResponse {
            server,
            rate_limit: RateLimitSection::new(
                engine.store().backend_name(),
                policy.default_quota,
                policy.overrides.len(),
                engine.store_timeout(),
            ),
        };
        Self {
            health: HealthChecker::new(engine.clone()),
            engine,
            identifier,
            policy,
            metrics: MetricsCollector::new(),
            region,
            config_view,
        }
    }
}

/// Decide whether the calling client may proceed.
///
/// Any engine failure fails closed: the request is rejected with a server
/// error and no quota is consumed.
pub async fn check_rate_limit(
    State(state): State<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
) -> ThrottlerResult<Response> {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let signals = RequestSignals::from_headers(&headers, remote_addr);
    let key = state.identifier.resolve(&signals);
    let quota = state.policy.quota_for(key.as_str());
    let request_id = request_id
        .map(|Extension(id)| id.0)
        .unwrap_or_else(generate_request_id);

    let decision = match state
        .engine
        .allow(key.as_str(), None, quota.limit, quota.window)
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            state.metrics.record_failure();
            match &e {
                ThrottlerError::ProtocolError(_) => {
                    error!(key = %key, request_id = %request_id, error = %e, "rate limit check failed")
                }
                _ => warn!(key = %key, request_id = %request_id, error = %e, "rate limit check failed, rejecting"),
            }
            return Err(e);
        }
    };

    state.metrics.record_decision(decision.allowed);

    let body = DecisionResponseBuilder::build(&decision, &request_id, &state.region);
    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };

    let mut resp = (status, Json(body)).into_response();
    let headers = resp.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(quota.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_time / 1000));
    if !decision.allowed {
        let retry_after_ms = decision.reset_time.saturating_sub(now_millis());
        headers.insert("retry-after", HeaderValue::from(retry_after_ms.div_ceil(1000).max(1)));
    }

    Ok(resp)
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let health = state.health.check_health().await;
    let status = if health.store_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

/// Decision counters since startup
pub async fn stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Non-secret running configuration
pub async fn current_config(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.config_view.clone())
}
