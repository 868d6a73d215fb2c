//! Router tests against a mock identity provider
//!
//! Covers:
//! - Protected route challenge and return-to round trip
//! - Callback success and failure responses, cookie handling
//! - Logout redirect and local invalidation
//! - Health and readiness checks

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use portcullis_auth_core::Gateway;
use portcullis_test_utils::{
    query_param, IdTokenClaims, MockProvider, TestKeyPair, TEST_CLIENT_ID, TEST_CLIENT_SECRET,
};
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

use gateway_api::state::AppState;
use gateway_api::{build_router, Config, HSTS_VALUE};

const BASE_URL: &str = "https://app.example.com";
const SESSION_COOKIE: &str = "portcullis_session";
const LOGIN_COOKIE: &str = "portcullis_login";

async fn app_for(provider: &MockProvider) -> Router {
    app_with_secure_cookies(provider, false).await
}

async fn app_with_secure_cookies(provider: &MockProvider, secure: bool) -> Router {
    let vars: HashMap<&str, String> = HashMap::from([
        ("COGNITO_CLIENT_ID", TEST_CLIENT_ID.to_string()),
        ("COGNITO_CLIENT_SECRET", TEST_CLIENT_SECRET.to_string()),
        ("COGNITO_METADATA_ADDRESS", provider.metadata_address()),
        ("COGNITO_LOGOUT_URL", provider.log_out_url()),
        ("COGNITO_BASE_URL", BASE_URL.to_string()),
        ("SESSION_SECRET", "k".repeat(32)),
        ("GROUP_CLAIM_TYPE", "cognito:groups".to_string()),
        ("COOKIE_SECURE", secure.to_string()),
    ]);
    let config = Config::from_lookup(|name| vars.get(name).cloned()).unwrap();
    let gateway = Gateway::connect(config.gateway.clone()).await.unwrap();
    build_router(AppState::new(gateway, config))
}

async fn send(app: &Router, method: Method, uri: &str, cookies: &[(&str, &str)]) -> Response<Body> {
    let mut request = Request::builder().method(method).uri(uri);
    if !cookies.is_empty() {
        let header_value = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        request = request.header(header::COOKIE, header_value);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// `Set-Cookie` header for `name`, if any
fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

/// Value part of a `Set-Cookie` header
fn cookie_value(set_cookie: &str) -> String {
    let pair = set_cookie.split(';').next().unwrap();
    pair.split_once('=').unwrap().1.to_string()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

struct Challenge {
    state: String,
    nonce: String,
    login_cookie: String,
}

async fn challenge(app: &Router, uri: &str) -> Challenge {
    let response = send(app, Method::GET, uri, &[]).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let authorize = Url::parse(&location(&response)).unwrap();
    let login_cookie = cookie_value(&set_cookie(&response, LOGIN_COOKIE).unwrap());
    Challenge {
        state: query_param(&authorize, "state").unwrap(),
        nonce: query_param(&authorize, "nonce").unwrap(),
        login_cookie,
    }
}

/// Run a complete sign-in and return the callback response
async fn sign_in(app: &Router, provider: &MockProvider, start_uri: &str) -> Response<Body> {
    let login = challenge(app, start_uri).await;

    let keys = TestKeyPair::load();
    let claims = IdTokenClaims::valid(&provider.issuer(), TEST_CLIENT_ID, &login.nonce);
    provider
        .mount_token_response("code-1", &keys.sign(&claims), "access-1")
        .await;
    provider
        .mount_userinfo("access-1", serde_json::json!({ "sub": claims.sub() }))
        .await;

    send(
        app,
        Method::GET,
        &format!("/signin-oidc?code=code-1&state={}", login.state),
        &[(LOGIN_COOKIE, login.login_cookie.as_str())],
    )
    .await
}

// ============================================================================
// Challenge and callback
// ============================================================================

#[tokio::test]
async fn test_protected_route_redirects_to_provider() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = send(&app, Method::GET, "/me", &[]).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let target = location(&response);
    assert!(target.starts_with(&format!("{}/oauth2/authorize?", provider.issuer())));
    let target = Url::parse(&target).unwrap();
    assert_eq!(
        query_param(&target, "redirect_uri").as_deref(),
        Some("https://app.example.com/signin-oidc")
    );

    let login_cookie = set_cookie(&response, LOGIN_COOKIE).unwrap();
    assert!(login_cookie.contains("HttpOnly"));
    assert!(login_cookie.contains("SameSite=Lax"));
    assert!(set_cookie(&response, SESSION_COOKIE).is_none());
}

#[tokio::test]
async fn test_sign_in_returns_to_requested_route() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = sign_in(&app, &provider, "/login?return_to=/reports%3Fyear%3D2024").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/reports?year=2024");

    let session = set_cookie(&response, SESSION_COOKIE).unwrap();
    assert!(session.contains("Max-Age=28800"));
    let cleared = set_cookie(&response, LOGIN_COOKIE).unwrap();
    assert!(cleared.contains("Max-Age=0"));

    let token = cookie_value(&session);
    let response = send(&app, Method::GET, "/me", &[(SESSION_COOKIE, token.as_str())]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["scheme"], "oidc");
    assert_eq!(body["email"], "test@example.com");
    let groups: Vec<&str> = body["claims"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["type"] == "cognito:groups")
        .filter_map(|c| c["value"].as_str())
        .collect();
    assert_eq!(groups, vec!["identities"]);
}

#[tokio::test]
async fn test_protected_route_round_trip() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = sign_in(&app, &provider, "/me").await;
    assert_eq!(location(&response), "/me");
}

#[tokio::test]
async fn test_login_when_signed_in_skips_provider() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = sign_in(&app, &provider, "/login").await;
    let token = cookie_value(&set_cookie(&response, SESSION_COOKIE).unwrap());

    let response = send(
        &app,
        Method::GET,
        "/login?return_to=https://evil.example.com",
        &[(SESSION_COOKIE, token.as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");
    assert!(set_cookie(&response, LOGIN_COOKIE).is_none());
}

#[tokio::test]
async fn test_forged_state_rejected() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;
    let login = challenge(&app, "/login").await;

    let response = send(
        &app,
        Method::GET,
        "/signin-oidc?code=code-1&state=forged",
        &[(LOGIN_COOKIE, login.login_cookie.as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response, SESSION_COOKIE).is_none());
    assert!(set_cookie(&response, LOGIN_COOKIE)
        .unwrap()
        .contains("Max-Age=0"));

    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "AUTHENTICATION_FAILED");
    assert!(!body.to_string().contains("forged"));
    assert_eq!(provider.token_requests().await, 0);
}

#[tokio::test]
async fn test_provider_error_rejected() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;
    let login = challenge(&app, "/login").await;

    let response = send(
        &app,
        Method::GET,
        &format!(
            "/signin-oidc?error=access_denied&error_description=User+cancelled&state={}",
            login.state
        ),
        &[(LOGIN_COOKIE, login.login_cookie.as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response, SESSION_COOKIE).is_none());
}

#[tokio::test]
async fn test_token_endpoint_outage_is_service_unavailable() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;
    let login = challenge(&app, "/login").await;
    provider.mount_token_error(503, "temporarily_unavailable").await;

    let response = send(
        &app,
        Method::GET,
        &format!("/signin-oidc?code=code-1&state={}", login.state),
        &[(LOGIN_COOKIE, login.login_cookie.as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "PROVIDER_UNAVAILABLE");
}

#[tokio::test]
async fn test_tampered_session_cookie_challenges() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = send(&app, Method::GET, "/me", &[(SESSION_COOKIE, "v1.AAAA")]).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).contains("/oauth2/authorize?"));
}

// ============================================================================
// Logout
// ============================================================================

#[tokio::test]
async fn test_logout_redirects_and_invalidates() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = sign_in(&app, &provider, "/login").await;
    let token = cookie_value(&set_cookie(&response, SESSION_COOKIE).unwrap());

    let response = send(&app, Method::POST, "/logout", &[(SESSION_COOKIE, token.as_str())]).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        format!(
            "{}?client_id={TEST_CLIENT_ID}&logout_uri={BASE_URL}",
            provider.log_out_url()
        )
    );
    assert!(set_cookie(&response, SESSION_COOKIE)
        .unwrap()
        .contains("Max-Age=0"));

    // The old cookie no longer authenticates
    let response = send(&app, Method::GET, "/me", &[(SESSION_COOKIE, token.as_str())]).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).contains("/oauth2/authorize?"));
}

#[tokio::test]
async fn test_logout_without_session() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = send(&app, Method::GET, "/logout", &[]).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with(&provider.log_out_url()));
}

// ============================================================================
// Health checks and middleware
// ============================================================================

#[tokio::test]
async fn test_health_and_ready() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = send(&app, Method::GET, "/health", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["service"], "gateway-api");

    let response = send(&app, Method::GET, "/ready", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["checks"]["provider_metadata"],
        "ok"
    );
}

#[tokio::test]
async fn test_request_id_propagated() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = send(&app, Method::GET, "/login", &[]).await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_hsts_sent_with_secure_cookies() {
    let provider = MockProvider::start().await;
    let app = app_with_secure_cookies(&provider, true).await;

    for uri in ["/login", "/health"] {
        let response = send(&app, Method::GET, uri, &[]).await;
        assert_eq!(
            response
                .headers()
                .get(header::STRICT_TRANSPORT_SECURITY)
                .and_then(|v| v.to_str().ok()),
            Some(HSTS_VALUE),
            "{uri} missing HSTS"
        );
    }

    let response = send(&app, Method::GET, "/login", &[]).await;
    assert!(set_cookie(&response, LOGIN_COOKIE).unwrap().contains("; Secure"));
}

#[tokio::test]
async fn test_no_hsts_without_secure_cookies() {
    let provider = MockProvider::start().await;
    let app = app_for(&provider).await;

    let response = send(&app, Method::GET, "/health", &[]).await;
    assert!(!response
        .headers()
        .contains_key(header::STRICT_TRANSPORT_SECURITY));
}
