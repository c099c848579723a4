//! `Authorization: Bearer` guards for the HTTP routes.
//!
//! A guard resolves the bearer token to a [`CredentialKey`], checks it in
//! the credential store under its principal's namespace, and stores the
//! key as a request extension for the handler behind it.

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dsvp_core::{CredentialKey, TokenError};
use dsvp_store::Principal;
use tracing::{debug, error, warn};

use crate::metrics as m;
use crate::server::AppState;

/// Credential key of the authenticated caller, set by the guards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authenticated {
    /// Namespace the key was found in.
    pub principal: Principal,
    /// The caller's key.
    pub key: CredentialKey,
}

/// Decode the bearer credential of a request.
pub fn bearer_key(headers: &HeaderMap) -> Result<CredentialKey, TokenError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(TokenError::MalformedHeader)?;
    CredentialKey::from_authorization(value)
}

/// `401` with a `Bearer` challenge.
pub fn challenge(realm: &str) -> Response {
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    let value = format!("Bearer realm=\"{realm}\"");
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            let _ = response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        Err(e) => error!(realm, error = %e, "realm is not a valid header value"),
    }
    response
}

/// Guard for routes called by workers (`worker:<key>`).
pub async fn require_worker(State(state): State<AppState>, req: Request, next: Next) -> Response {
    guard(Principal::Worker, &state, req, next).await
}

/// Guard for routes called by users (`user:<key>`).
pub async fn require_user(State(state): State<AppState>, req: Request, next: Next) -> Response {
    guard(Principal::User, &state, req, next).await
}

async fn guard(principal: Principal, state: &AppState, mut req: Request, next: Next) -> Response {
    let label = principal.prefix();
    let key = match bearer_key(req.headers()) {
        Ok(key) => key,
        Err(e) => {
            debug!(principal = label, error = %e, path = %req.uri().path(), "missing or malformed bearer credential");
            metrics::counter!(m::HTTP_AUTH_TOTAL, "principal" => label, "result" => "malformed").increment(1);
            return challenge(&state.config.realm);
        }
    };

    match state.store.exists(principal, &key).await {
        Ok(true) => {
            metrics::counter!(m::HTTP_AUTH_TOTAL, "principal" => label, "result" => "accepted").increment(1);
            let _ = req.extensions_mut().insert(Authenticated { principal, key });
            next.run(req).await
        }
        Ok(false) => {
            warn!(principal = label, key = %key, path = %req.uri().path(), "{label} key not found (http)");
            metrics::counter!(m::HTTP_AUTH_TOTAL, "principal" => label, "result" => "not_found").increment(1);
            challenge(&state.config.realm)
        }
        Err(e) => {
            error!(principal = label, key = %key, error = %e, "credential check failed");
            metrics::counter!(m::HTTP_AUTH_TOTAL, "principal" => label, "result" => "error").increment(1);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
