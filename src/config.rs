//! Runtime configuration for the tripdesk client.
//! Precedence: command-line flags, then environment variables, then defaults.

use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub const DEFAULT_AUTH_URL: &str = "http://127.0.0.1:54321";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub auth_url: String,
    pub anon_key: String,
    pub token_file: Option<PathBuf>,
    pub start_path: String,
    pub http_timeout_secs: u64,
    pub reset_redirect: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            anon_key: String::new(),
            token_file: None,
            start_path: "/".to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            reset_redirect: None,
        }
    }
}

fn parse_u64(name: &str, v: &str) -> Result<u64> {
    v.trim().parse::<u64>().map_err(|_| anyhow!("{} expects a positive integer, got '{}'", name, v))
}

fn normalize_path(p: &str) -> String {
    let t = p.trim();
    if t.starts_with('/') { t.to_string() } else { format!("/{}", t) }
}

impl AppConfig {
    /// Load from the process environment and the given arguments (program name
    /// already stripped).
    pub fn load(args: &[String]) -> Result<Self> {
        Self::from_sources(|k| std::env::var(k).ok(), args)
    }

    pub fn from_sources<F>(env: F, args: &[String]) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = AppConfig::default();

        // Environment variables
        if let Some(v) = env("TRIPDESK_AUTH_URL") { cfg.auth_url = v; }
        if let Some(v) = env("TRIPDESK_ANON_KEY") { cfg.anon_key = v; }
        if let Some(v) = env("TRIPDESK_TOKEN_FILE").filter(|s| !s.is_empty()) { cfg.token_file = Some(PathBuf::from(v)); }
        if let Some(v) = env("TRIPDESK_START_PATH") { cfg.start_path = normalize_path(&v); }
        if let Some(v) = env("TRIPDESK_HTTP_TIMEOUT") { cfg.http_timeout_secs = parse_u64("TRIPDESK_HTTP_TIMEOUT", &v)?; }
        if let Some(v) = env("TRIPDESK_RESET_REDIRECT").filter(|s| !s.is_empty()) { cfg.reset_redirect = Some(v); }

        // CLI arguments override environment
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = || args.get(i + 1).ok_or_else(|| anyhow!("{} requires a value", flag));
            match flag {
                "--auth-url" => cfg.auth_url = value()?.clone(),
                "--anon-key" => cfg.anon_key = value()?.clone(),
                "--token-file" => cfg.token_file = Some(PathBuf::from(value()?)),
                "--start-path" => cfg.start_path = normalize_path(value()?),
                "--timeout" => cfg.http_timeout_secs = parse_u64("--timeout", value()?)?,
                "--reset-redirect" => cfg.reset_redirect = Some(value()?.clone()),
                _ => return Err(anyhow!("unrecognized argument: {}", flag)),
            }
            i += 2;
        }

        if cfg.http_timeout_secs == 0 {
            return Err(anyhow!("timeout must be at least one second"));
        }
        Ok(cfg)
    }
}
