//! Portcullis Gateway API
//!
//! HTTP front door for the OpenID Connect session gateway.
//!
//! ## Endpoints
//!
//! - `GET /login?return_to=/path` - Redirect to the identity provider
//! - `GET {callback_path}` - Provider callback (default `/signin-oidc`)
//! - `GET|POST /logout` - Sign out locally and at the provider
//! - `GET /me` - Current identity (protected)
//!
//! ## Health Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check

pub mod config;
pub mod cookies;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod state;

use axum::http::{header, HeaderValue};
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::{callback, health, login, logout, me, ready};
use crate::state::AppState;

pub use crate::config::{Config, ConfigError};

/// `Strict-Transport-Security` sent when cookies are marked `Secure`
pub const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";

/// Build the HTTP router
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.request_timeout();
    let callback_path = state.config.gateway.provider.callback_path.clone();
    let hsts = state
        .config
        .gateway
        .session
        .cookie_secure
        .then(|| HeaderValue::from_static(HSTS_VALUE));

    let auth_routes = Router::new()
        .route("/login", get(login))
        .route(&callback_path, get(callback))
        .route("/logout", get(logout).post(logout))
        .route("/me", get(me));

    // Health routes (no timeout - must always respond quickly)
    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    // Build middleware stack (order matters - outermost first)
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        .merge(auth_routes)
        .layer(middleware)
        .merge(health_routes)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            hsts,
        ))
        .with_state(state)
}
