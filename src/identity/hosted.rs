//! reqwest client for the hosted auth REST API (GoTrue-style endpoints under
//! `/auth/v1`, profile rows under `/rest/v1/profiles`).

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::{AuthError, AuthResult};
use crate::tprintln;

use super::client::AuthClient;
use super::role::Role;
use super::tokens::{TokenPair, TokenStore};
use super::user::{Credentials, Profile, User};

#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: RemoteUser,
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    app_metadata: serde_json::Value,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    company_name: Option<String>,
}

pub struct HostedAuthClient {
    base: Url,
    client: reqwest::Client,
    tokens: TokenStore,
    // bumped by every sign-in and sign-out; token writes from an older
    // generation are dropped
    generation: Mutex<u64>,
    reset_redirect: Option<String>,
}

impl HostedAuthClient {
    pub fn new(base: &str, anon_key: &str, timeout: Duration, tokens: TokenStore) -> anyhow::Result<Self> {
        let base = Url::parse(base).context("invalid auth base URL")?;
        let mut headers = HeaderMap::new();
        if !anon_key.is_empty() {
            headers.insert("apikey", HeaderValue::from_str(anon_key).context("anon key is not a valid header value")?);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { base, client, tokens, generation: Mutex::new(0), reset_redirect: None })
    }

    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let tokens = match cfg.token_file.as_deref() {
            Some(path) => TokenStore::with_file(path),
            None => TokenStore::in_memory(),
        };
        let mut client = Self::new(&cfg.auth_url, &cfg.anon_key, Duration::from_secs(cfg.http_timeout_secs), tokens)?;
        client.reset_redirect = cfg.reset_redirect.clone();
        Ok(client)
    }

    pub fn with_reset_redirect(mut self, url: impl Into<String>) -> Self {
        self.reset_redirect = Some(url.into());
        self
    }

    pub fn tokens(&self) -> &TokenStore { &self.tokens }

    fn next_generation(&self) -> u64 {
        let mut g = self.generation.lock();
        *g += 1;
        *g
    }

    fn generation(&self) -> u64 { *self.generation.lock() }

    /// Replace (or clear) the held tokens if no sign-in or sign-out started
    /// after `generation`. Returns false when the write was dropped.
    fn store_tokens(&self, generation: u64, tokens: Option<TokenPair>) -> bool {
        let current = self.generation.lock();
        if *current != generation {
            tracing::debug!(target: "tripdesk::auth", "dropping token write from generation {} (now {})", generation, *current);
            return false;
        }
        match tokens {
            Some(t) => self.tokens.set(t),
            None => self.tokens.clear(),
        }
        true
    }

    async fn revoke(&self, access_token: &str) -> AuthResult<()> {
        let url = self.endpoint("auth/v1/logout")?;
        let resp = self.client.post(url).header(AUTHORIZATION, Self::bearer(access_token)?).send().await?;
        let status = resp.status();
        // 401: the token was already dead, nothing left to revoke
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(AuthError::from_status(status.as_u16(), false, &text))
    }

    // Url::join would drop any path prefix the base carries (reverse proxies).
    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        let s = format!("{}/{}", self.base.as_str().trim_end_matches('/'), path.trim_start_matches('/'));
        Url::parse(&s).map_err(|e| AuthError::unknown("invalid_url".to_string(), e.to_string()))
    }

    fn bearer(token: &str) -> AuthResult<HeaderValue> {
        HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| AuthError::unknown("invalid_token".to_string(), e.to_string()))
    }

    async fn grant(&self, grant_type: &str, body: serde_json::Value) -> AuthResult<GrantResponse> {
        let url = self.endpoint("auth/v1/token")?;
        let resp = self.client.post(url).query(&[("grant_type", grant_type)]).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::from_status(status.as_u16(), grant_type == "password", &text));
        }
        Ok(resp.json::<GrantResponse>().await?)
    }

    async fn refresh_tokens(&self, generation: u64, tokens: &TokenPair) -> AuthResult<GrantResponse> {
        let res = self.grant("refresh_token", serde_json::json!({"refresh_token": tokens.refresh_token})).await;
        match res {
            Ok(g) => {
                let pair = TokenPair::from_grant(g.access_token.clone(), g.refresh_token.clone(), g.expires_in);
                if !self.store_tokens(generation, Some(pair)) {
                    return Err(AuthError::superseded());
                }
                tracing::debug!(target: "tripdesk::auth", "access token refreshed");
                Ok(g)
            }
            Err(e) => {
                if matches!(e, AuthError::SessionExpired { .. }) { self.store_tokens(generation, None); }
                Err(e)
            }
        }
    }

    async fn fetch_remote_user(&self, access_token: &str) -> AuthResult<Option<RemoteUser>> {
        let url = self.endpoint("auth/v1/user")?;
        let resp = self.client.get(url).header(AUTHORIZATION, Self::bearer(access_token)?).send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::from_status(status.as_u16(), false, &text));
        }
        Ok(Some(resp.json::<RemoteUser>().await?))
    }

    async fn fetch_profile(&self, user_id: &str, access_token: &str) -> AuthResult<ProfileRow> {
        let url = self.endpoint("rest/v1/profiles")?;
        let filter = format!("eq.{}", user_id);
        let resp = self
            .client
            .get(url)
            .query(&[("id", filter.as_str()), ("select", "role,full_name,phone,company_name")])
            .header(AUTHORIZATION, Self::bearer(access_token)?)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::from_status(status.as_u16(), false, &text));
        }
        let rows: Vec<ProfileRow> = resp.json().await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    /// Turn the auth service's user record into a `User`, joining the
    /// profiles row when the role is not embedded in the token metadata.
    async fn resolve_user(&self, remote: RemoteUser, access_token: &str) -> AuthResult<User> {
        let embedded_role = metadata_str(&remote.app_metadata, "role")
            .or_else(|| metadata_str(&remote.user_metadata, "role"));
        let profile_row = if embedded_role.is_some() {
            None
        } else {
            Some(self.fetch_profile(&remote.id, access_token).await?)
        };
        let role_str = embedded_role
            .or_else(|| profile_row.as_ref().and_then(|p| p.role.clone()))
            .ok_or_else(|| AuthError::from(anyhow!("user {} has no role assigned", remote.id)))?;
        let role: Role = role_str
            .parse()
            .map_err(|e: super::role::UnknownRole| AuthError::unknown("unknown_role".to_string(), e.to_string()))?;

        let row = profile_row.unwrap_or_default();
        let name = row
            .full_name
            .or_else(|| metadata_str(&remote.user_metadata, "full_name"))
            .or_else(|| metadata_str(&remote.user_metadata, "name"))
            .or_else(|| remote.email.clone())
            .unwrap_or_else(|| remote.id.clone());
        let profile = Profile {
            email: remote.email,
            phone: row.phone.or(remote.phone),
            company: row.company_name.or_else(|| metadata_str(&remote.user_metadata, "company_name")),
        };
        Ok(User { id: remote.id, role, name, profile: Some(profile) })
    }
}

fn metadata_str(meta: &serde_json::Value, key: &str) -> Option<String> {
    meta.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(|s| s.to_string())
}

#[async_trait]
impl AuthClient for HostedAuthClient {
    async fn sign_in(&self, credentials: &Credentials) -> AuthResult<User> {
        let generation = self.next_generation();
        let body = serde_json::json!({"email": credentials.email, "password": credentials.password});
        let grant = self.grant("password", body).await?;
        let tokens = TokenPair::from_grant(grant.access_token, grant.refresh_token, grant.expires_in);
        let access = tokens.access_token.clone();
        if !self.store_tokens(generation, Some(tokens)) {
            // a sign-out or newer sign-in started while the grant was in flight
            if let Err(e) = self.revoke(&access).await {
                tracing::warn!(target: "tripdesk::auth", "failed to revoke superseded grant: {}", e);
            }
            return Err(AuthError::superseded());
        }
        let user = match self.resolve_user(grant.user, &access).await {
            Ok(u) => u,
            Err(e) => {
                // a user we cannot classify must not stay signed in
                if self.store_tokens(generation, None) {
                    if let Err(re) = self.revoke(&access).await {
                        tracing::debug!(target: "tripdesk::auth", "revoking unclassified session failed: {}", re);
                    }
                }
                return Err(e);
            }
        };
        if self.generation() != generation {
            return Err(AuthError::superseded());
        }
        tprintln!("auth.sign_in user={} role={}", user.id, user.role);
        Ok(user)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let held = {
            let mut g = self.generation.lock();
            *g += 1;
            let held = self.tokens.get();
            self.tokens.clear();
            held
        };
        let Some(tokens) = held else { return Ok(()); };
        self.revoke(&tokens.access_token).await
    }

    async fn reset_password(&self, email: &str) -> AuthResult<()> {
        let url = self.endpoint("auth/v1/recover")?;
        let mut req = self.client.post(url).json(&serde_json::json!({"email": email}));
        if let Some(redirect) = self.reset_redirect.as_deref() {
            req = req.query(&[("redirect_to", redirect)]);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::from_status(status.as_u16(), false, &text));
        }
        Ok(())
    }

    async fn current_user(&self) -> AuthResult<Option<User>> {
        let generation = self.generation();
        let Some(mut tokens) = self.tokens.get() else { return Ok(None); };
        if tokens.is_expired() {
            let g = self.refresh_tokens(generation, &tokens).await?;
            tokens = TokenPair::from_grant(g.access_token, g.refresh_token, g.expires_in);
        }
        let remote = match self.fetch_remote_user(&tokens.access_token).await? {
            Some(r) => r,
            None => {
                // Rejected before expiry (revoked or clock skew): one refresh attempt.
                let g = self.refresh_tokens(generation, &tokens).await?;
                match self.fetch_remote_user(&g.access_token).await? {
                    Some(r) => {
                        tokens.access_token = g.access_token;
                        r
                    }
                    None => {
                        self.store_tokens(generation, None);
                        return Err(AuthError::expired("session_expired", "session is no longer valid"));
                    }
                }
            }
        };
        self.resolve_user(remote, &tokens.access_token).await.map(Some)
    }
}
