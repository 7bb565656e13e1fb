use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{AppState, middleware::log_errors};

pub mod contact;
pub mod health;

/// 组装全部路由，挂载在 api_base_uri 下
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/contact", post(contact::submit))
        .route("/ping", get(health::ping));

    // axum 不允许在根路径 nest
    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(base, api)
    };

    router
        .layer(axum::middleware::from_fn(log_errors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
