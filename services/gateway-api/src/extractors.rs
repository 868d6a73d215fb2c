//! Axum extractors for authentication

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::response::Response;

use portcullis_types::Session;

use crate::cookies::cookie_value;
use crate::handlers::auth::challenge;
use crate::state::AppState;

/// Session for a protected route.
///
/// Without a valid session the request is answered with the provider
/// redirect, carrying the requested path as the return-to target.
#[derive(Debug, Clone)]
pub struct RequireSession(pub Session);

impl<S> FromRequestParts<S> for RequireSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        if let Some(session) = find_session(&app_state, parts).await {
            return Ok(Self(session));
        }

        let return_to = parts.uri.path_and_query().map(|pq| pq.as_str());
        tracing::debug!(path = %parts.uri.path(), "No session, challenging");
        Err(challenge(&app_state, return_to).await)
    }
}

/// Session if one is present; never rejects
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<Session>);

impl<S> FromRequestParts<S> for MaybeSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        Ok(Self(find_session(&app_state, parts).await))
    }
}

// Tampered, expired, revoked and absent cookies all read as `None`.
async fn find_session(state: &AppState, parts: &Parts) -> Option<Session> {
    let token = cookie_value(&parts.headers, &state.session_config().cookie_name);
    state.gateway.authenticate(token).await
}
