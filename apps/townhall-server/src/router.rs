use axum::{
    routing::{get, post},
    Router,
};

use crate::{access_log, api, AppState};

pub(crate) mod paths {
    pub const HEALTHZ: &str = "/healthz";
    pub const EVENTS_STREAM: &str = "/api/events/stream";
    pub const EVENTS_PUBLISH: &str = "/api/events/publish";
    pub const EVENTS_STATS: &str = "/api/events/stats";
}

pub(crate) fn build_router() -> Router<AppState> {
    Router::new()
        .route(paths::HEALTHZ, get(api::events::healthz))
        .route(paths::EVENTS_STREAM, get(api::events::events_stream))
        .route(paths::EVENTS_PUBLISH, post(api::events::events_publish))
        .route(paths::EVENTS_STATS, get(api::events::events_stats))
}

pub(crate) fn attach_layers(router: Router<AppState>, state: AppState) -> Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::trace::TraceLayer;

    let concurrency_limit = state.config().concurrency_limit;
    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
        .layer(axum::middleware::from_fn(access_log::access_log_mw))
}
