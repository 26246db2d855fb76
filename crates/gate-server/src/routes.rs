//! Authentication routes
//!
//! Thin handlers: pull the session id out of the cookie, turn the body into
//! a typed attempt, and hand it to the authenticators.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gate_auth::session::extract_session_id;
use gate_auth::{
    AdminModeSession, LoginState, PrimaryCredential, SecondFactorAttempt, StepUpAttempt, StepUpState,
};
use gate_core::GateError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/sign_in", post(sign_in))
        .route("/users/two_factor", post(two_factor))
        .route("/users/two_factor/setup", get(two_factor_setup))
        .route("/users/two_factor/skip", post(skip_two_factor))
        .route("/admin/session/new", post(request_admin_mode))
        .route(
            "/admin/session",
            get(admin_mode_status)
                .post(enable_admin_mode)
                .delete(disable_admin_mode),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct SecondFactorBody {
    pub otp_attempt: Option<String>,
    /// Browser assertion, either as a JSON object or as its serialized form
    pub device_response: Option<Value>,
}

fn device_response(value: Value) -> String {
    match value {
        Value::String(raw) => raw,
        other => other.to_string(),
    }
}

impl SecondFactorBody {
    fn into_attempt(self) -> ApiResult<SecondFactorAttempt> {
        match (self.otp_attempt, self.device_response) {
            (Some(code), None) => Ok(SecondFactorAttempt::Otp(code)),
            (None, Some(response)) => Ok(SecondFactorAttempt::WebAuthn(device_response(response))),
            _ => Err(ApiError::bad_request(
                "Provide exactly one of otp_attempt or device_response",
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StepUpRequestBody {
    #[serde(default)]
    pub return_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StepUpBody {
    pub password: Option<String>,
    pub otp_attempt: Option<String>,
    pub device_response: Option<Value>,
}

impl StepUpBody {
    fn into_attempt(self) -> ApiResult<StepUpAttempt> {
        match (self.password, self.otp_attempt, self.device_response) {
            (Some(password), None, None) => Ok(StepUpAttempt::Password(password)),
            (None, Some(code), None) => Ok(StepUpAttempt::SecondFactor(SecondFactorAttempt::Otp(code))),
            (None, None, Some(response)) => Ok(StepUpAttempt::SecondFactor(
                SecondFactorAttempt::WebAuthn(device_response(response)),
            )),
            _ => Err(ApiError::bad_request(
                "Provide exactly one of password, otp_attempt or device_response",
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SetupStatus {
    pub requires_setup: bool,
}

#[derive(Debug, Serialize)]
pub struct SkipResponse {
    pub skip_until: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct AdminModeStatus {
    pub active: bool,
    pub admin_mode: Option<AdminModeSession>,
}

#[derive(Debug, Serialize)]
pub struct AdminModeDisabled {
    pub was_active: bool,
}

fn session_cookie(state: &AppState, headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|cookies| extract_session_id(cookies, &state.cookie.name))
}

/// Flows after the password step need the session they started on
fn require_session(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    session_cookie(state, headers).ok_or(ApiError::Gate(GateError::StaleChallenge))
}

fn client_ip(headers: &HeaderMap, connect: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

fn discard_session(state: &AppState, session_id: &str) {
    if let Err(e) = state.auth.sessions.delete(session_id) {
        debug!(error = %e, "Could not discard session");
    }
}

/// Every sign-in runs on a fresh session; the previous one is dropped once
/// the password has been accepted.
async fn sign_in(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(credential): Json<PrimaryCredential>,
) -> ApiResult<Response> {
    let previous = session_cookie(&state, &headers);
    let session = state
        .auth
        .start_session(client_ip(&headers, connect))
        .map_err(GateError::from)?;

    let login_state: LoginState = match state
        .login
        .attempt_primary_credential(&session.id, &credential)
        .await
    {
        Ok(login_state) => login_state,
        Err(e) => {
            discard_session(&state, &session.id);
            return Err(e.into());
        }
    };
    if let Some(previous) = previous {
        discard_session(&state, &previous);
    }

    let cookie = HeaderValue::from_str(&state.cookie.build_cookie(&session.id))
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let mut response = Json(login_state).into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

async fn two_factor(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SecondFactorBody>,
) -> ApiResult<Json<LoginState>> {
    let session_id = require_session(&state, &headers)?;
    let attempt = body.into_attempt()?;
    let login_state = state.login.attempt_second_factor(&session_id, attempt).await?;
    Ok(Json(login_state))
}

async fn two_factor_setup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<SetupStatus>> {
    let session_id = require_session(&state, &headers)?;
    let requires_setup = state.login.current_user_requires_setup(&session_id).await?;
    Ok(Json(SetupStatus { requires_setup }))
}

async fn skip_two_factor(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<SkipResponse>> {
    let session_id = require_session(&state, &headers)?;
    let skip_until = state.login.skip_two_factor_setup(&session_id).await?;
    Ok(Json(SkipResponse { skip_until }))
}

async fn request_admin_mode(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StepUpRequestBody>,
) -> ApiResult<Json<StepUpState>> {
    let session_id = require_session(&state, &headers)?;
    let step_up = state
        .admin_mode
        .request_step_up(&session_id, body.return_to.as_deref())
        .await?;
    Ok(Json(step_up))
}

async fn enable_admin_mode(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StepUpBody>,
) -> ApiResult<Json<StepUpState>> {
    let session_id = require_session(&state, &headers)?;
    let attempt = body.into_attempt()?;
    let step_up = state.admin_mode.attempt_step_up(&session_id, attempt).await?;
    Ok(Json(step_up))
}

async fn admin_mode_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<AdminModeStatus>> {
    let session_id = require_session(&state, &headers)?;
    let admin_mode = state.admin_mode.current_admin_mode(&session_id)?;
    Ok(Json(AdminModeStatus {
        active: admin_mode.is_some(),
        admin_mode,
    }))
}

async fn disable_admin_mode(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<AdminModeDisabled>> {
    let session_id = require_session(&state, &headers)?;
    let was_active = state.admin_mode.disable_admin_mode(&session_id)?;
    Ok(Json(AdminModeDisabled { was_active }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_factor_body_needs_exactly_one() {
        let otp = SecondFactorBody {
            otp_attempt: Some("123456".into()),
            device_response: None,
        };
        assert_eq!(otp.into_attempt().unwrap(), SecondFactorAttempt::Otp("123456".into()));

        let object = SecondFactorBody {
            otp_attempt: None,
            device_response: Some(serde_json::json!({ "id": "abc" })),
        };
        assert_eq!(
            object.into_attempt().unwrap(),
            SecondFactorAttempt::WebAuthn(r#"{"id":"abc"}"#.into())
        );

        let string = SecondFactorBody {
            otp_attempt: None,
            device_response: Some(Value::String("{}".into())),
        };
        assert_eq!(string.into_attempt().unwrap(), SecondFactorAttempt::WebAuthn("{}".into()));

        assert!(SecondFactorBody::default().into_attempt().is_err());
        let both = SecondFactorBody {
            otp_attempt: Some("1".into()),
            device_response: Some(Value::Null),
        };
        assert!(both.into_attempt().is_err());
    }

    #[test]
    fn test_step_up_body() {
        let password = StepUpBody {
            password: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(password.into_attempt().unwrap(), StepUpAttempt::Password("secret".into()));

        let mixed = StepUpBody {
            password: Some("secret".into()),
            otp_attempt: Some("123456".into()),
            device_response: None,
        };
        assert!(mixed.into_attempt().is_err());
    }

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.7:5000".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(ConnectInfo(peer))).as_deref(),
            Some("192.0.2.7")
        );

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(
            client_ip(&headers, Some(ConnectInfo(peer))).as_deref(),
            Some("203.0.113.9")
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }
}
