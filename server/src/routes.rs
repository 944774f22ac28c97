use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_cookies::CookieManagerLayer;

use crate::{
    components::pages,
    errors::{AuthError, ResponseFormat, ServerResult, WithFormat},
    flows::{
        handle_callback, handle_login, handle_login_ext, handle_logout, handle_logout_ext,
        Authenticated, CallbackParams, Credentials, LogoutOutcome, LOGOUT_EXT_ROUTE, LOGOUT_ROUTE,
    },
    session::CookieSession,
    state::AppState,
};

/// Build the application router with all routes
pub fn routes(app_state: AppState) -> axum::Router {
    let mut router = axum::Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        // Authorization Code flow
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route(LOGOUT_ROUTE, get(logout));

    // Password flow
    if app_state.ropc.is_some() {
        router = router
            .route("/loginext", get(login_ext_query).post(login_ext_body))
            .route(LOGOUT_EXT_ROUTE, get(logout_ext));
    }

    router
        .layer(CookieManagerLayer::new())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(sentry_tower::SentryHttpLayer::with_transaction())
        .layer(sentry_tower::NewSentryLayer::<axum::extract::Request>::new_from_top())
        .with_state(app_state)
}

async fn index(State(state): State<AppState>) -> Response {
    let ropc_enabled = state.ropc.is_some();

    match state.response_format() {
        ResponseFormat::Html => pages::index_page(ropc_enabled).into_response(),
        ResponseFormat::Json => {
            let mut routes = vec!["/login", "/callback", LOGOUT_ROUTE];
            if ropc_enabled {
                routes.extend(["/loginext", LOGOUT_EXT_ROUTE]);
            }
            Json(json!({ "routes": routes })).into_response()
        }
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Start the Authorization Code flow
async fn login(State(state): State<AppState>, session: CookieSession) -> Response {
    let url = handle_login(state.acg.as_ref(), &session, state.login_scope());
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}

/// Handle the provider redirect after the user authenticated
async fn callback(
    State(state): State<AppState>,
    session: CookieSession,
    Query(params): Query<CallbackParams>,
) -> ServerResult<Response> {
    let format = state.response_format();
    let authenticated = handle_callback(state.acg.as_ref(), &session, params)
        .await
        .with_format(format)?;

    Ok(render_authenticated(&state, &authenticated))
}

#[derive(Deserialize)]
struct LogoutParams {
    refresh_token: Option<String>,
    #[serde(rename = "issuerLogoutURL")]
    issuer_logout_url: Option<String>,
}

async fn logout(
    State(state): State<AppState>,
    Query(params): Query<LogoutParams>,
) -> ServerResult<Response> {
    let format = state.response_format();
    let refresh_token = required_refresh_token(params.refresh_token).with_format(format)?;
    let issuer_logout_url = params.issuer_logout_url.filter(|url| !url.is_empty());

    let outcome = handle_logout(
        state.acg.as_ref(),
        &refresh_token,
        issuer_logout_url.as_deref(),
        state.remote_logout_policy(),
    )
    .await
    .with_format(format)?;

    Ok(render_logout(&state, &outcome))
}

#[derive(Deserialize)]
struct LogoutExtParams {
    refresh_token: Option<String>,
}

async fn logout_ext(
    State(state): State<AppState>,
    Query(params): Query<LogoutExtParams>,
) -> ServerResult<Response> {
    let format = state.response_format();
    let provider = state
        .ropc
        .as_deref()
        .ok_or(AuthError::FlowDisabled)
        .with_format(format)?;
    let refresh_token = required_refresh_token(params.refresh_token).with_format(format)?;

    let outcome = handle_logout_ext(provider, &refresh_token)
        .await
        .with_format(format)?;

    Ok(render_logout(&state, &outcome))
}

/// Credentials as they arrive, before checking both halves are present
#[derive(Default, Deserialize)]
struct CredentialParams {
    #[serde(alias = "user")]
    username: Option<String>,
    password: Option<String>,
}

impl CredentialParams {
    fn into_credentials(self) -> Result<Credentials, AuthError> {
        match (self.username, self.password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Ok(Credentials { username, password })
            }
            _ => Err(AuthError::BadRequest("username and password are required")),
        }
    }
}

fn parse_credential_body(headers: &HeaderMap, body: &[u8]) -> Result<CredentialParams, AuthError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let malformed = || AuthError::BadRequest("malformed login request");
    if is_json {
        serde_json::from_slice(body).map_err(|_| malformed())
    } else {
        serde_urlencoded::from_bytes(body).map_err(|_| malformed())
    }
}

async fn login_ext_query(
    State(state): State<AppState>,
    Query(params): Query<CredentialParams>,
) -> ServerResult<Response> {
    password_login(&state, Ok(params)).await
}

async fn login_ext_body(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Response> {
    password_login(&state, parse_credential_body(&headers, &body)).await
}

async fn password_login(
    state: &AppState,
    params: Result<CredentialParams, AuthError>,
) -> ServerResult<Response> {
    let format = state.response_format();
    let provider = state
        .ropc
        .as_deref()
        .ok_or(AuthError::FlowDisabled)
        .with_format(format)?;
    let credentials = params
        .and_then(CredentialParams::into_credentials)
        .with_format(format)?;
    let scope = state
        .config
        .ropc
        .as_ref()
        .and_then(|ropc| ropc.scope.as_deref());

    let authenticated = handle_login_ext(provider, credentials, scope)
        .await
        .with_format(format)?;

    Ok(render_authenticated(state, &authenticated))
}

fn required_refresh_token(refresh_token: Option<String>) -> Result<String, AuthError> {
    refresh_token
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::BadRequest("refresh_token is required"))
}

fn render_authenticated(state: &AppState, authenticated: &Authenticated) -> Response {
    let include_tokens = state.config.flows.enable_view_output;

    match state.response_format() {
        ResponseFormat::Html => pages::authenticated_page(authenticated, include_tokens).into_response(),
        ResponseFormat::Json => Json(authenticated.payload(include_tokens)).into_response(),
    }
}

fn render_logout(state: &AppState, outcome: &LogoutOutcome) -> Response {
    match state.response_format() {
        ResponseFormat::Html => pages::logout_page(outcome).into_response(),
        ResponseFormat::Json => Json(outcome).into_response(),
    }
}
