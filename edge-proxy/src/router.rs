use std::future::ready;
use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    compression::{predicate::SizeAbove, CompressionLayer},
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    api::{endpoint, sse_endpoint},
    config::{AllowOrigins, Config},
    environments::{environment_service::EnvironmentService, refresh::RefreshState},
    health,
    metrics::utils::{setup_metrics_recorder, track_metrics},
    notifications::change_store::ChangeNotificationStore,
};

// Responses smaller than this are sent uncompressed.
const MIN_COMPRESSED_SIZE: u16 = 1000;

#[derive(Clone)]
pub struct State {
    pub environment_service: Arc<EnvironmentService>,
    pub refresh_state: Arc<RefreshState>,
    pub change_store: Arc<ChangeNotificationStore>,
    pub config: Arc<Config>,
}

fn cors_layer(allow_origins: &AllowOrigins) -> CorsLayer {
    let allow_origin = match allow_origins {
        AllowOrigins::Any => AllowOrigin::mirror_request(),
        AllowOrigins::List(origins) => AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        ),
    };
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::HEAD])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(allow_origin)
}

pub fn router(
    environment_service: Arc<EnvironmentService>,
    refresh_state: Arc<RefreshState>,
    change_store: Arc<ChangeNotificationStore>,
    config: Config,
) -> Router {
    let enable_metrics = config.enable_metrics;
    let cors = cors_layer(&config.allow_origins);
    let max_concurrency = config.max_concurrency;

    let state = State {
        environment_service,
        refresh_state,
        change_store,
        config: Arc::new(config),
    };

    // liveness/readiness checks
    let status_router = Router::new()
        .route("/proxy/health/liveness", get(health::liveness))
        .route("/proxy/health/readiness", get(health::readiness))
        .route("/proxy/health", get(health::readiness))
        .route("/health", get(health::readiness));

    let api_router = Router::new()
        .route("/api/v1/flags", get(endpoint::flags))
        .route("/api/v1/flags/", get(endpoint::flags))
        .route(
            "/api/v1/identities",
            get(endpoint::identity_by_query).post(endpoint::identity),
        )
        .route(
            "/api/v1/identities/",
            get(endpoint::identity_by_query).post(endpoint::identity),
        )
        .layer(ConcurrencyLimitLayer::new(max_concurrency))
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(MIN_COMPRESSED_SIZE)));

    // streams are long lived and stay out of the concurrency limit and compression
    let sse_router = Router::new()
        .route(
            "/sse/environments/:environment_key/queue-change",
            post(sse_endpoint::queue_change),
        )
        .route(
            "/sse/environments/:environment_key/identities/queue-change",
            post(sse_endpoint::queue_identity_change),
        )
        .route(
            "/sse/environments/:environment_key/stream",
            get(sse_endpoint::stream),
        );

    let router = Router::new()
        .merge(status_router)
        .merge(api_router)
        .merge(sse_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Global metrics recorders can play poorly with tests, only install when asked to
    if !enable_metrics {
        return router;
    }
    match setup_metrics_recorder() {
        Ok(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to install prometheus recorder");
            router
        }
    }
}
