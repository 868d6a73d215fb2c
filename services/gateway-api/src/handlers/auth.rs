//! Authentication handlers (login, callback, logout, me)

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use portcullis_auth_core::sanitize_return_to;
use portcullis_types::{CallbackParams, Claim, Session};

use crate::cookies::{clear_cookie, cookie_value, login_cookie, session_cookie};
use crate::error::{ApiError, ApiResult};
use crate::extractors::{MaybeSession, RequireSession};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Relative path to return to after sign-in
    pub return_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub session_id: String,
    pub scheme: String,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub claims: Vec<ClaimInfo>,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimInfo {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl From<Claim> for ClaimInfo {
    fn from(claim: Claim) -> Self {
        Self {
            claim_type: claim.claim_type,
            value: claim.value,
        }
    }
}

impl From<Session> for MeResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.id.to_string(),
            scheme: session.identity.scheme.to_string(),
            subject: session.identity.subject().map(str::to_string),
            email: session.identity.email().map(str::to_string),
            created_at: session.created_at.to_rfc3339(),
            expires_at: session.expires_at.to_rfc3339(),
            claims: session
                .identity
                .claims
                .into_iter()
                .map(ClaimInfo::from)
                .collect(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /login?return_to=/path - Redirect to the identity provider
///
/// An already signed-in user goes straight to the return-to path.
pub async fn login(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
    Query(query): Query<LoginQuery>,
) -> Response {
    if session.is_some() {
        let target = sanitize_return_to(query.return_to.as_deref());
        return redirect(&target, std::iter::empty()).unwrap_or_else(IntoResponse::into_response);
    }
    challenge(&state, query.return_to.as_deref()).await
}

/// GET {callback_path} - Provider callback; establishes the session
///
/// The pending-login cookie is cleared whatever the outcome.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Response {
    let config = state.session_config();
    let clear_login = clear_cookie(config, &config.login_cookie_name);
    let pending = cookie_value(&headers, &config.login_cookie_name);

    let result = match state.gateway.callback(&params, pending).await {
        Ok(signed_in) => {
            tracing::info!(return_to = %signed_in.return_to, "Session established");
            redirect(
                &signed_in.return_to,
                [
                    session_cookie(config, signed_in.token.as_str()),
                    clear_login.clone(),
                ],
            )
        }
        Err(e) => Err(ApiError::from(e)),
    };

    match result {
        Ok(response) => response,
        Err(e) => with_cookie(e.into_response(), &clear_login),
    }
}

/// GET|POST /logout - Invalidate the session and sign out at the provider
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let config = state.session_config();
    let token = cookie_value(&headers, &config.cookie_name);

    let target = state.gateway.sign_out(token).await?;
    redirect(&target, [clear_cookie(config, &config.cookie_name)])
}

/// GET /me - Current identity (protected)
pub async fn me(RequireSession(session): RequireSession) -> Json<MeResponse> {
    Json(MeResponse::from(session))
}

// ============================================================================
// Helpers
// ============================================================================

/// Provider redirect for an unauthenticated request
pub(crate) async fn challenge(state: &AppState, return_to: Option<&str>) -> Response {
    let result = match state.gateway.challenge(return_to).await {
        Ok(login) => redirect(
            login.authorization_url.as_str(),
            [login_cookie(state.session_config(), &login.pending_cookie)],
        ),
        Err(e) => Err(ApiError::from(e)),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

/// 302 with `Location` and the given `Set-Cookie` values
fn redirect<I>(location: &str, cookies: I) -> ApiResult<Response>
where
    I: IntoIterator<Item = String>,
{
    let mut builder = Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .header(header::CACHE_CONTROL, "no-store");
    for cookie in cookies {
        builder = builder.header(header::SET_COOKIE, cookie);
    }
    builder
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(format!("redirect response: {e}")))
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    if let Ok(value) = cookie.parse() {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}
