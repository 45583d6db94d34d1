use std::sync::Arc;

use axum::{routing::get, Router};
use http::HeaderValue;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::middleware;
use crate::AppState;

pub mod auth;
pub mod calendars;
pub mod health;
pub mod shares;

/// API routes without the rate limiter, which `main` layers on top.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/calendars", calendars::router())
        .nest("/shares", shares::router())
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", e))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::DELETE,
            http::Method::OPTIONS,
            http::Method::PATCH,
        ])
        .allow_headers([
            http::header::CONTENT_TYPE,
            http::header::AUTHORIZATION,
            http::header::ACCEPT,
        ])
        .allow_credentials(true))
}

/// Full application router. `api` is mounted under `/api`.
pub fn app(state: Arc<AppState>, api: Router<Arc<AppState>>) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config)?;

    Ok(Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api)
        .with_state(state)
        .layer(axum::middleware::from_fn(
            middleware::security_headers::security_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}
