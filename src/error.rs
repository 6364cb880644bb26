//! Auth error model shared by the session store, the auth collaborators and the
//! terminal host. Every failure coming back from the auth service is folded
//! into one of four kinds before it reaches a consumer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    InvalidCredentials,
    NetworkFailure,
    SessionExpired,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthError {
    #[error("{code}: {message}")]
    InvalidCredentials { code: String, message: String },
    #[error("{code}: {message}")]
    NetworkFailure { code: String, message: String },
    #[error("{code}: {message}")]
    SessionExpired { code: String, message: String },
    #[error("{code}: {message}")]
    Unknown { code: String, message: String },
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Code carried by results discarded because a newer request was issued.
pub const SUPERSEDED: &str = "superseded";

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::InvalidCredentials { .. } => AuthErrorKind::InvalidCredentials,
            AuthError::NetworkFailure { .. } => AuthErrorKind::NetworkFailure,
            AuthError::SessionExpired { .. } => AuthErrorKind::SessionExpired,
            AuthError::Unknown { .. } => AuthErrorKind::Unknown,
        }
    }

    pub fn code_str(&self) -> &str {
        match self {
            AuthError::InvalidCredentials { code, .. }
            | AuthError::NetworkFailure { code, .. }
            | AuthError::SessionExpired { code, .. }
            | AuthError::Unknown { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AuthError::InvalidCredentials { message, .. }
            | AuthError::NetworkFailure { message, .. }
            | AuthError::SessionExpired { message, .. }
            | AuthError::Unknown { message, .. } => message.as_str(),
        }
    }

    pub fn invalid_credentials<S: Into<String>>(code: S, msg: S) -> Self { AuthError::InvalidCredentials { code: code.into(), message: msg.into() } }
    pub fn network<S: Into<String>>(code: S, msg: S) -> Self { AuthError::NetworkFailure { code: code.into(), message: msg.into() } }
    pub fn expired<S: Into<String>>(code: S, msg: S) -> Self { AuthError::SessionExpired { code: code.into(), message: msg.into() } }
    pub fn unknown<S: Into<String>>(code: S, msg: S) -> Self { AuthError::Unknown { code: code.into(), message: msg.into() } }

    pub fn superseded() -> Self {
        AuthError::unknown(SUPERSEDED, "a newer auth request replaced this one")
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, AuthError::Unknown { code, .. } if code == SUPERSEDED)
    }

    /// HTTP status a server-side surface would answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::InvalidCredentials { .. } => 401,
            AuthError::SessionExpired { .. } => 401,
            AuthError::NetworkFailure { .. } => 503,
            AuthError::Unknown { .. } => 500,
        }
    }

    /// Map a non-success response from the auth service. `grant` is true for
    /// the password grant, where 400/401 mean the credentials were rejected
    /// rather than that a session lapsed.
    pub fn from_status(status: u16, grant: bool, body: &str) -> Self {
        let detail = extract_error_detail(body).unwrap_or_else(|| format!("HTTP {}", status));
        match (status, grant) {
            (400, true) | (401, true) | (422, true) => AuthError::invalid_credentials("invalid_credentials".to_string(), detail),
            (401, false) | (403, false) => AuthError::expired("session_expired".to_string(), detail),
            (400, false) if body.contains("invalid_grant") => AuthError::expired("session_expired".to_string(), detail),
            (s, _) if s >= 500 => AuthError::network("upstream_unavailable".to_string(), detail),
            _ => AuthError::unknown("auth_error".to_string(), detail),
        }
    }
}

// The hosted service reports failures under a handful of field names.
fn extract_error_detail(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|k| v.get(*k).and_then(|x| x.as_str()))
        .map(|s| s.to_string())
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AuthError::network("network_failure".to_string(), err.to_string())
        } else if err.is_decode() {
            AuthError::unknown("invalid_response".to_string(), err.to_string())
        } else {
            AuthError::unknown("auth_error".to_string(), err.to_string())
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::Unknown { code: "auth_error".into(), message: err.to_string() }
    }
}
