//! Route configuration.

use crate::auth::{query_auth, read_auth, write_auth};
use crate::error::ApiError;
use crate::handlers;
use crate::metrics::{RECOVERED_PANICS, metrics_handler, metrics_middleware};
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let read_routes = Router::new()
        .route(
            "/get/{pubkey}",
            get(handlers::get_credential).post(handlers::get_credential),
        )
        .route(
            "/get/{unique_id}/{pubkey}",
            get(handlers::get_credential_scoped).post(handlers::get_credential_scoped),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), read_auth));

    let write_routes = Router::new()
        .route("/put", post(handlers::put))
        .route("/put/", post(handlers::put))
        .route(
            "/put/{param}",
            post(handlers::put_scoped).delete(handlers::delete),
        )
        .route("/put/{unique_id}/{pubkey}", delete(handlers::delete_scoped))
        .route(
            "/verify/{pubkey}",
            get(handlers::verify).post(handlers::verify),
        )
        .route(
            "/verify/{unique_id}/{pubkey}",
            get(handlers::verify_scoped).post(handlers::verify_scoped),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), write_auth));

    let query_routes = Router::new()
        .route("/query/{pubkey}", get(handlers::query).post(handlers::query))
        .route(
            "/query/{unique_id}/{pubkey}",
            get(handlers::query_scoped).post(handlers::query_scoped),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), query_auth));

    Router::new()
        .route("/", get(handlers::root))
        .route("/metrics", get(metrics_handler))
        .merge(read_routes)
        .merge(write_routes)
        .merge(query_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Recovered handler panics surface as plain 500s, never as auth failures.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "uncaught panic in handler");
    RECOVERED_PANICS.inc();
    ApiError::Internal.into_response()
}
