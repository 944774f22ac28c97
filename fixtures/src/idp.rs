//! In-process OpenID provider for exercising the relying party end to end.
//!
//! Logins are auto-approved as the single fixture user. A handful of magic
//! values make the provider misbehave on purpose; see the constants below.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use rand::RngCore as _;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;
use url::{form_urlencoded, Url};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "wonderland";
pub const SUBJECT: &str = "alice-sub";
pub const EMAIL: &str = "alice@example.com";

/// Browser-facing client, used with the authorization code grant
pub const WEB_CLIENT_ID: &str = "rp-web";
pub const WEB_CLIENT_SECRET: &str = "web-secret";
/// Service client, used with the password grant
pub const SERVICE_CLIENT_ID: &str = "rp-service";
pub const SERVICE_CLIENT_SECRET: &str = "service-secret";

/// Revoking this token answers 503
pub const FAIL_REVOCATION_TOKEN: &str = "revoke-fails";
/// Ending a session with this `id_token_hint` answers 500
pub const FAIL_LOGOUT_HINT: &str = "logout-fails";
/// Password grants for this username are answered after [`SLOW_RESPONSE`]
pub const SLOW_USERNAME: &str = "slowpoke";
pub const SLOW_RESPONSE: Duration = Duration::from_secs(3);

const TOKEN_LIFETIME_SECS: u64 = 300;

struct PendingCode {
    client_id: String,
    redirect_uri: Option<String>,
    code_challenge: String,
}

#[derive(Default)]
pub struct IdpState {
    issuer: String,
    codes: Mutex<HashMap<String, PendingCode>>,
    access_tokens: Mutex<HashMap<String, Value>>,
    pub token_requests: AtomicUsize,
    pub userinfo_requests: AtomicUsize,
    pub logout_requests: AtomicUsize,
    pub revoked: Mutex<Vec<String>>,
}

impl IdpState {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn userinfo_requests(&self) -> usize {
        self.userinfo_requests.load(Ordering::SeqCst)
    }

    pub fn logout_requests(&self) -> usize {
        self.logout_requests.load(Ordering::SeqCst)
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.issuer)
    }
}

pub fn router(state: Arc<IdpState>) -> Router {
    Router::new()
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/jwks", get(jwks))
        .route("/authorize", get(authorize))
        .route("/token", post(token))
        .route("/userinfo", get(userinfo))
        .route("/revoke", post(revoke))
        .route("/logout", get(end_session))
        .with_state(state)
}

/// A provider listening on an ephemeral local port
pub struct RunningIdp {
    pub addr: SocketAddr,
    pub state: Arc<IdpState>,
}

impl RunningIdp {
    pub fn issuer(&self) -> &str {
        self.state.issuer()
    }

    pub fn url(&self, path: &str) -> String {
        self.state.endpoint(path)
    }
}

/// Bind to `127.0.0.1:0` and serve in the background.
pub async fn spawn() -> anyhow::Result<RunningIdp> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = Arc::new(IdpState::new(format!("http://{addr}")));

    let app = router(state.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "Fixture IdP stopped");
        }
    });

    Ok(RunningIdp { addr, state })
}

async fn discovery(State(state): State<Arc<IdpState>>) -> impl IntoResponse {
    Json(json!({
        "issuer": state.issuer,
        "authorization_endpoint": state.endpoint("/authorize"),
        "token_endpoint": state.endpoint("/token"),
        "userinfo_endpoint": state.endpoint("/userinfo"),
        "revocation_endpoint": state.endpoint("/revoke"),
        "end_session_endpoint": state.endpoint("/logout"),
        "jwks_uri": state.endpoint("/jwks"),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "grant_types_supported": ["authorization_code", "password", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
    }))
}

/// No keys are published; ID tokens are never meant to verify.
async fn jwks() -> impl IntoResponse {
    Json(json!({ "keys": [] }))
}

#[derive(Deserialize)]
struct AuthorizeQuery {
    client_id: Option<String>,
    response_type: Option<String>,
    redirect_uri: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    state: Option<String>,
}

async fn authorize(
    State(state): State<Arc<IdpState>>,
    Query(params): Query<AuthorizeQuery>,
) -> Response {
    let Some(redirect_uri) = params.redirect_uri.clone() else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "redirect_uri is required");
    };
    let Ok(mut redirect) = Url::parse(&redirect_uri) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "redirect_uri is not a URL");
    };

    let known_client = params.client_id.as_deref() == Some(WEB_CLIENT_ID);
    let pkce = params.code_challenge_method.as_deref() == Some("S256");

    {
        let mut query = redirect.query_pairs_mut();
        match (known_client, params.response_type.as_deref(), &params.code_challenge) {
            (true, Some("code"), Some(challenge)) if pkce => {
                let code = random_token("code");
                info!("IdP: Authorizing {USERNAME}");
                state.codes.lock().unwrap().insert(
                    code.clone(),
                    PendingCode {
                        client_id: WEB_CLIENT_ID.to_string(),
                        redirect_uri: Some(redirect_uri.clone()),
                        code_challenge: challenge.clone(),
                    },
                );
                query.append_pair("code", &code);
            }
            (false, ..) => {
                query.append_pair("error", "unauthorized_client");
            }
            _ => {
                query
                    .append_pair("error", "invalid_request")
                    .append_pair("error_description", "S256 code challenge is required");
            }
        }
        if let Some(client_state) = &params.state {
            query.append_pair("state", client_state);
        }
    }

    Redirect::to(redirect.as_str()).into_response()
}

async fn token(
    State(state): State<Arc<IdpState>>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);

    let Some(client_id) = authenticate_client(&headers, &params) else {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", "Client authentication failed");
    };

    if params.get("username").map(String::as_str) == Some(SLOW_USERNAME) {
        tokio::time::sleep(SLOW_RESPONSE).await;
    }

    match params.get("grant_type").map(String::as_str) {
        Some("authorization_code") => authorization_code_grant(&state, &client_id, &params),
        Some("password") => password_grant(&state, &client_id, &params),
        _ => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "Only authorization_code and password are supported",
        ),
    }
}

fn authorization_code_grant(
    state: &IdpState,
    client_id: &str,
    params: &HashMap<String, String>,
) -> Response {
    let code = params.get("code").cloned().unwrap_or_default();
    // Codes are single use: removed before any check
    let Some(pending) = state.codes.lock().unwrap().remove(&code) else {
        return invalid_grant("Invalid or already redeemed authorization code");
    };

    if pending.client_id != client_id {
        return invalid_grant("Code was issued to another client");
    }
    if pending.redirect_uri.as_ref() != params.get("redirect_uri") {
        return invalid_grant("redirect_uri does not match");
    }

    let verifier = params.get("code_verifier").cloned().unwrap_or_default();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    if challenge != pending.code_challenge {
        return invalid_grant("PKCE verification failed");
    }

    issue_tokens(state, client_id, "openid email profile")
}

fn password_grant(state: &IdpState, client_id: &str, params: &HashMap<String, String>) -> Response {
    let username = params.get("username").map(String::as_str);
    let password = params.get("password").map(String::as_str);
    if username != Some(USERNAME) || password != Some(PASSWORD) {
        return invalid_grant("Invalid user credentials");
    }

    let scope = params.get("scope").map(String::as_str).unwrap_or("openid");
    issue_tokens(state, client_id, scope)
}

fn issue_tokens(state: &IdpState, client_id: &str, scope: &str) -> Response {
    let access_token = random_token("at");
    let refresh_token = random_token("rt");
    let claims = json!({
        "sub": SUBJECT,
        "email": EMAIL,
        "name": "Alice Liddell",
        "preferred_username": USERNAME,
    });

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    // Well formed but the signature is random bytes; the relying party
    // parses ID tokens and never verifies them
    let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "RS256", "typ": "JWT" }).to_string());
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "iss": state.issuer,
            "sub": SUBJECT,
            "aud": client_id,
            "iat": now,
            "exp": now + TOKEN_LIFETIME_SECS,
        })
        .to_string(),
    );
    let signature = random_token("sig");
    let id_token = format!("{header}.{payload}.{}", URL_SAFE_NO_PAD.encode(signature));

    state
        .access_tokens
        .lock()
        .unwrap()
        .insert(access_token.clone(), claims);

    Json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": TOKEN_LIFETIME_SECS,
        "refresh_token": refresh_token,
        "id_token": id_token,
        "scope": scope,
    }))
    .into_response()
}

async fn userinfo(State(state): State<Arc<IdpState>>, headers: HeaderMap) -> Response {
    state.userinfo_requests.fetch_add(1, Ordering::SeqCst);

    let claims = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| state.access_tokens.lock().unwrap().get(token).cloned());

    match claims {
        Some(claims) => Json(claims).into_response(),
        None => oauth_error(StatusCode::UNAUTHORIZED, "invalid_token", "Unknown access token"),
    }
}

async fn revoke(
    State(state): State<Arc<IdpState>>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    if authenticate_client(&headers, &params).is_none() {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", "Client authentication failed");
    }

    let token = params.get("token").cloned().unwrap_or_default();
    if token == FAIL_REVOCATION_TOKEN {
        return oauth_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "temporarily_unavailable",
            "Revocation is down",
        );
    }

    info!("IdP: Revoking token");
    state.revoked.lock().unwrap().push(token);
    StatusCode::OK.into_response()
}

#[derive(Deserialize)]
struct EndSessionQuery {
    id_token_hint: Option<String>,
}

async fn end_session(
    State(state): State<Arc<IdpState>>,
    Query(params): Query<EndSessionQuery>,
) -> StatusCode {
    state.logout_requests.fetch_add(1, Ordering::SeqCst);

    if params.id_token_hint.as_deref() == Some(FAIL_LOGOUT_HINT) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::NO_CONTENT
    }
}

/// Accepts `client_secret_basic` and `client_secret_post`. Returns the
/// authenticated client id.
fn authenticate_client(headers: &HeaderMap, params: &HashMap<String, String>) -> Option<String> {
    let (client_id, client_secret) = match basic_credentials(headers) {
        Some(credentials) => credentials,
        None => (
            params.get("client_id")?.clone(),
            params.get("client_secret")?.clone(),
        ),
    };

    let expected = match client_id.as_str() {
        WEB_CLIENT_ID => WEB_CLIENT_SECRET,
        SERVICE_CLIENT_ID => SERVICE_CLIENT_SECRET,
        _ => return None,
    };

    (client_secret == expected).then_some(client_id)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;

    Some((form_decode(id), form_decode(secret)))
}

fn form_decode(value: &str) -> String {
    form_urlencoded::parse(value.as_bytes())
        .map(|(key, _)| key.into_owned())
        .next()
        .unwrap_or_default()
}

fn random_token(prefix: &str) -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}-{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn invalid_grant(description: &str) -> Response {
    oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", description)
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "error_description": description,
        })),
    )
        .into_response()
}
