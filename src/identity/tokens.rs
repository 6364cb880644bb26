//! Access/refresh token bookkeeping for the hosted auth client.
//! Tokens live in memory and, when a token file is configured, are mirrored to
//! disk so a restarted client can restore its session.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::tprintln;

/// Tokens are treated as expired this long before their real expiry.
const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair").field("expires_at", &self.expires_at).finish_non_exhaustive()
    }
}

impl TokenPair {
    /// Build from a grant response. The JWT `exp` claim wins over `expires_in`
    /// when both are present.
    pub fn from_grant(access_token: String, refresh_token: String, expires_in: Option<i64>) -> Self {
        let expires_at = jwt_expiry(&access_token)
            .or_else(|| expires_in.map(|s| Utc::now() + Duration::seconds(s)))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));
        Self { access_token, refresh_token, expires_at }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_SKEW_SECS) <= now
    }

    pub fn is_expired(&self) -> bool { self.is_expired_at(Utc::now()) }
}

/// Read the `exp` claim of a JWT without verifying it. Verification is the
/// auth service's job; the client only needs to know when to refresh.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let v: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = v.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

#[derive(Debug, Default)]
pub struct TokenStore {
    current: RwLock<Option<TokenPair>>,
    file: Option<PathBuf>,
}

impl TokenStore {
    pub fn in_memory() -> Self { Self::default() }

    /// Token store mirrored to `path`. A missing or unreadable file starts empty.
    pub fn with_file<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let loaded = match load_token_file(&path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(target: "tripdesk::auth", "ignoring token file {}: {}", path.display(), e);
                None
            }
        };
        Self { current: RwLock::new(loaded), file: Some(path) }
    }

    pub fn get(&self) -> Option<TokenPair> { self.current.read().clone() }

    pub fn set(&self, tokens: TokenPair) {
        if let Some(path) = self.file.as_deref() {
            if let Err(e) = save_token_file(path, &tokens) {
                tracing::warn!(target: "tripdesk::auth", "failed to persist tokens to {}: {}", path.display(), e);
            }
        }
        *self.current.write() = Some(tokens);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
        if let Some(path) = self.file.as_deref() {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    tracing::warn!(target: "tripdesk::auth", "failed to remove token file {}: {}", path.display(), e);
                }
            }
        }
    }
}

fn load_token_file(path: &Path) -> Result<Option<TokenPair>> {
    if !path.exists() { return Ok(None); }
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if text.trim().is_empty() { return Ok(None); }
    let tokens: TokenPair = serde_json::from_str(&text).context("token file is not valid JSON")?;
    tprintln!("tokens.load path={} expires_at={}", path.display(), tokens.expires_at);
    Ok(Some(tokens))
}

fn save_token_file(path: &Path, tokens: &TokenPair) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() { fs::create_dir_all(dir)?; }
    }
    let text = serde_json::to_string_pretty(tokens)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
