//! # tidepool-server
//!
//! Service layer and HTTP surface for tidepool: the List/SetRead/Fetch/
//! Search methods, the fetch reconciler, and the Mastodon timeline client.

pub mod fetcher;
pub mod handlers;
pub mod mastodon;
pub mod service;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use fetcher::{
    FetchReconciler, NotificationSnapshot, TimelinePage, TimelineSource, FETCH_PAGE_LIMIT,
    MAX_FETCH_PAGES,
};
pub use mastodon::MastodonTimeline;
pub use service::StreamService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: StreamService,
}

/// Build the HTTP router over a stream service.
pub fn router(service: StreamService) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/v1/list", post(handlers::list))
        .route("/v1/set-read", post(handlers::set_read))
        .route("/v1/fetch", post(handlers::fetch))
        .route("/v1/search", get(handlers::search))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}
