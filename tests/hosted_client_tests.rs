//! HostedAuthClient against an in-process mock of the hosted auth REST API.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::tempdir;

use tripdesk::error::AuthErrorKind;
use tripdesk::identity::{AuthClient, Credentials, HostedAuthClient, Role, TokenPair, TokenStore};

const ANON_KEY: &str = "anon-test-key";
const PASSWORD: &str = "correct horse";

struct Mock {
    role: &'static str,
    embed_role: bool,
    calls: Mutex<Vec<String>>,
    apikeys: Mutex<Vec<Option<String>>>,
    valid_access: Mutex<HashSet<String>>,
    redirect_to: Mutex<Option<String>>,
    seq: Mutex<u32>,
}

impl Mock {
    fn new(role: &'static str, embed_role: bool) -> Arc<Self> {
        Arc::new(Self {
            role,
            embed_role,
            calls: Mutex::new(Vec::new()),
            apikeys: Mutex::new(Vec::new()),
            valid_access: Mutex::new(HashSet::new()),
            redirect_to: Mutex::new(None),
            seq: Mutex::new(0),
        })
    }

    fn record(&self, name: &str, headers: &HeaderMap) {
        self.calls.lock().push(name.to_string());
        self.apikeys.lock().push(headers.get("apikey").and_then(|v| v.to_str().ok()).map(|s| s.to_string()));
    }

    fn calls(&self) -> Vec<String> { self.calls.lock().clone() }

    fn user_json(&self) -> Value {
        let app_metadata = if self.embed_role { json!({"provider": "email", "role": self.role}) } else { json!({"provider": "email"}) };
        json!({
            "id": "u-op",
            "email": "olga@fjord.test",
            "app_metadata": app_metadata,
            "user_metadata": {"full_name": "Olga From Metadata"}
        })
    }

    fn grant(&self) -> Value {
        let n = {
            let mut s = self.seq.lock();
            *s += 1;
            *s
        };
        let access = jwt(chrono::Utc::now().timestamp() + 3600, n);
        self.valid_access.lock().insert(access.clone());
        json!({
            "access_token": access,
            "refresh_token": "r-valid",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": self.user_json()
        })
    }
}

fn jwt(exp: i64, nonce: u32) -> String {
    let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = enc.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = enc.encode(format!(r#"{{"sub":"u-op","exp":{},"n":{}}}"#, exp, nonce));
    format!("{}.{}.sig", header, body)
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

async fn token(
    State(m): State<Arc<Mock>>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let grant_type = q.get("grant_type").cloned().unwrap_or_default();
    m.record(&format!("token:{}", grant_type), &headers);
    let bad = json!({"error": "invalid_grant", "error_description": "Invalid login credentials"});
    match grant_type.as_str() {
        "password" if body["password"] == PASSWORD => (StatusCode::OK, Json(m.grant())),
        "refresh_token" if body["refresh_token"] == "r-valid" => (StatusCode::OK, Json(m.grant())),
        "refresh_token" => (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant", "error_description": "Refresh Token Not Found"}))),
        _ => (StatusCode::BAD_REQUEST, Json(bad)),
    }
}

async fn user(State(m): State<Arc<Mock>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    m.record("user", &headers);
    match bearer(&headers) {
        Some(t) if m.valid_access.lock().contains(&t) => (StatusCode::OK, Json(m.user_json())),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({"msg": "invalid JWT"}))),
    }
}

async fn logout(State(m): State<Arc<Mock>>, headers: HeaderMap) -> StatusCode {
    m.record("logout", &headers);
    if let Some(t) = bearer(&headers) {
        m.valid_access.lock().remove(&t);
    }
    StatusCode::NO_CONTENT
}

async fn recover(
    State(m): State<Arc<Mock>>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    m.record("recover", &headers);
    if body["email"].as_str().unwrap_or("").is_empty() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"msg": "email required"})));
    }
    *m.redirect_to.lock() = q.get("redirect_to").cloned();
    (StatusCode::OK, Json(json!({})))
}

async fn profiles(
    State(m): State<Arc<Mock>>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    m.record("profiles", &headers);
    if q.get("id").map(|s| s.as_str()) != Some("eq.u-op") {
        return (StatusCode::OK, Json(json!([])));
    }
    (StatusCode::OK, Json(json!([{"role": m.role, "full_name": "Olga Operator", "company_name": "Fjord Tours"}])))
}

async fn spawn_mock(mock: Arc<Mock>) -> Result<String> {
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/user", get(user))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/recover", post(recover))
        .route("/rest/v1/profiles", get(profiles))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{}", addr))
}

fn client(base: &str, tokens: TokenStore) -> HostedAuthClient {
    HostedAuthClient::new(base, ANON_KEY, Duration::from_secs(5), tokens).expect("client")
}

fn creds(password: &str) -> Credentials { Credentials::new("olga@fjord.test", password) }

#[tokio::test]
async fn sign_in_joins_profile_when_role_not_embedded() -> Result<()> {
    let mock = Mock::new("TOUR_OPERATOR", false);
    let base = spawn_mock(mock.clone()).await?;
    let c = client(&base, TokenStore::in_memory());

    let u = c.sign_in(&creds(PASSWORD)).await?;
    assert_eq!(u.role, Role::TourOperator);
    assert_eq!(u.name, "Olga Operator");
    let profile = u.profile.clone().unwrap();
    assert_eq!(profile.company.as_deref(), Some("Fjord Tours"));
    assert_eq!(profile.email.as_deref(), Some("olga@fjord.test"));

    assert_eq!(mock.calls(), vec!["token:password", "profiles"]);
    assert!(mock.apikeys.lock().iter().all(|k| k.as_deref() == Some(ANON_KEY)));
    assert!(c.tokens().get().is_some());
    Ok(())
}

#[tokio::test]
async fn sign_in_uses_embedded_role() -> Result<()> {
    let mock = Mock::new("travel_agent", true);
    let base = spawn_mock(mock.clone()).await?;
    let c = client(&base, TokenStore::in_memory());

    let u = c.sign_in(&creds(PASSWORD)).await?;
    assert_eq!(u.role, Role::TravelAgent);
    assert_eq!(u.name, "Olga From Metadata");
    assert!(!mock.calls().contains(&"profiles".to_string()));
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() -> Result<()> {
    let mock = Mock::new("ADMIN", true);
    let base = spawn_mock(mock).await?;
    let c = client(&base, TokenStore::in_memory());

    let err = c.sign_in(&creds("nope")).await.unwrap_err();
    assert_eq!(err.kind(), AuthErrorKind::InvalidCredentials);
    assert_eq!(err.message(), "Invalid login credentials");
    assert!(c.tokens().get().is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_role_does_not_leave_a_session() -> Result<()> {
    let mock = Mock::new("PILOT", true);
    let base = spawn_mock(mock).await?;
    let c = client(&base, TokenStore::in_memory());

    let err = c.sign_in(&creds(PASSWORD)).await.unwrap_err();
    assert_eq!(err.kind(), AuthErrorKind::Unknown);
    assert_eq!(err.code_str(), "unknown_role");
    assert!(c.tokens().get().is_none());
    Ok(())
}

#[tokio::test]
async fn current_user_follows_sign_in_and_sign_out() -> Result<()> {
    let mock = Mock::new("ADMIN", true);
    let base = spawn_mock(mock.clone()).await?;
    let c = client(&base, TokenStore::in_memory());

    assert_eq!(c.current_user().await?, None);
    let signed_in = c.sign_in(&creds(PASSWORD)).await?;
    assert_eq!(c.current_user().await?, Some(signed_in));

    c.sign_out().await?;
    assert!(mock.calls().contains(&"logout".to_string()));
    assert!(c.tokens().get().is_none());
    assert_eq!(c.current_user().await?, None);
    // signing out twice is harmless
    c.sign_out().await?;
    Ok(())
}

#[tokio::test]
async fn expired_token_from_file_is_refreshed() -> Result<()> {
    let mock = Mock::new("TOUR_OPERATOR", true);
    let base = spawn_mock(mock.clone()).await?;
    let tmp = tempdir()?;
    let path = tmp.path().join("tokens.json");

    let stale = TokenPair::from_grant(jwt(chrono::Utc::now().timestamp() - 60, 0), "r-valid".into(), None);
    TokenStore::with_file(&path).set(stale.clone());

    let c = client(&base, TokenStore::with_file(&path));
    let u = c.current_user().await?.expect("session restored");
    assert_eq!(u.role, Role::TourOperator);
    assert_eq!(mock.calls(), vec!["token:refresh_token", "user"]);

    let persisted = TokenStore::with_file(&path).get().unwrap();
    assert_ne!(persisted.access_token, stale.access_token);
    assert!(!persisted.is_expired());
    Ok(())
}

#[tokio::test]
async fn dead_refresh_token_means_session_expired() -> Result<()> {
    let mock = Mock::new("TOUR_OPERATOR", true);
    let base = spawn_mock(mock).await?;
    let tokens = TokenStore::in_memory();
    tokens.set(TokenPair::from_grant(jwt(chrono::Utc::now().timestamp() - 60, 0), "r-revoked".into(), None));
    let c = client(&base, tokens);

    let err = c.current_user().await.unwrap_err();
    assert_eq!(err.kind(), AuthErrorKind::SessionExpired);
    assert!(c.tokens().get().is_none());
    Ok(())
}

#[tokio::test]
async fn reset_password_passes_redirect() -> Result<()> {
    let mock = Mock::new("ADMIN", true);
    let base = spawn_mock(mock.clone()).await?;
    let c = client(&base, TokenStore::in_memory()).with_reset_redirect("https://app.tripdesk.test/auth/reset-password");

    c.reset_password("olga@fjord.test").await?;
    assert_eq!(mock.redirect_to.lock().as_deref(), Some("https://app.tripdesk.test/auth/reset-password"));

    let err = c.reset_password("").await.unwrap_err();
    assert_eq!(err.kind(), AuthErrorKind::Unknown);
    Ok(())
}

#[tokio::test]
async fn unreachable_service_is_network_failure() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    let c = client(&format!("http://{}", addr), TokenStore::in_memory());

    let err = c.sign_in(&creds(PASSWORD)).await.unwrap_err();
    assert_eq!(err.kind(), AuthErrorKind::NetworkFailure);
    Ok(())
}
