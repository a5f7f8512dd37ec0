use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use http::HeaderName;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    propagate_header::PropagateHeaderLayer,
    request_id::{MakeRequestUuid, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::identity::identify;
use super::rate_limit::{rate_limit, RateLimiter};
use crate::observability::{get_metrics, HealthChecker, LatencyTimer};
use crate::repositories::LedgerStore;
use crate::services::{CancellationService, LedgerPolicy, LedgerService, PinHasher, WalletService};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub wallets: WalletService,
    pub ledger: LedgerService,
    pub cancellations: CancellationService,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>, pins: PinHasher, policy: LedgerPolicy) -> Self {
        Self {
            wallets: WalletService::new(Arc::clone(&store), pins.clone(), policy.clone()),
            ledger: LedgerService::new(Arc::clone(&store), pins, policy.clone()),
            cancellations: CancellationService::new(Arc::clone(&store), policy),
            health_checker: Arc::new(HealthChecker::new(Arc::clone(&store))),
            store,
            metrics_handle: None,
            rate_limiter: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Enables per-caller rate limiting on the API routes.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

async fn track_http(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let mut api = Router::new()
        // Wallets
        .route("/wallets", post(handlers::create_wallet).get(handlers::list_wallets))
        .route(
            "/wallets/:id",
            get(handlers::get_wallet).delete(handlers::delete_wallet),
        )
        .route("/wallets/:id/pin", put(handlers::change_pin))
        .route("/wallets/:id/status", put(handlers::update_wallet_status))
        .route("/wallets/:id/reconcile", get(handlers::reconcile_wallet))
        // Ledger
        .route("/wallets/:id/deposit", post(handlers::deposit))
        .route("/wallets/:id/withdraw", post(handlers::withdraw))
        .route("/wallets/:id/transfer", post(handlers::transfer))
        .route("/wallets/:id/transactions", get(handlers::list_wallet_transactions))
        .route("/transactions/:id", get(handlers::get_transaction))
        // Cancellations
        .route("/transactions/:id/cancel-request", post(handlers::request_cancellation))
        .route("/cancel-requests", get(handlers::list_cancellation_requests))
        .route("/cancel-requests/:id", get(handlers::get_cancellation_request))
        .route("/cancel-requests/:id/approve", post(handlers::approve_cancellation))
        .route("/cancel-requests/:id/reject", post(handlers::reject_cancellation));

    // identity runs first so the limiter can key on the caller
    if let Some(limiter) = state.rate_limiter.clone() {
        api = api.route_layer(middleware::from_fn_with_state(limiter, rate_limit));
    }
    let api = api.route_layer(middleware::from_fn(identify));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(api)
        .route_layer(middleware::from_fn(track_http))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateHeaderLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}
