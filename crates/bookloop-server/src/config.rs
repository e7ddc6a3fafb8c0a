//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `BOOKLOOP_HOST`
    /// Default: `0.0.0.0`
    pub host: String,

    /// Env: `BOOKLOOP_PORT`
    /// Default: `5000`
    pub port: u16,

    /// SQLite database file.
    /// Env: `BOOKLOOP_DB_PATH`
    /// Default: `bookloop.db`
    pub db_path: PathBuf,

    /// HMAC secret for bearer tokens.
    /// Env: `BOOKLOOP_JWT_SECRET`
    /// Default: a development secret (logged as a warning at startup).
    pub jwt_secret: String,

    /// Env: `BOOKLOOP_TOKEN_TTL_DAYS`
    /// Default: `7`
    pub token_ttl_days: i64,

    /// Whether realtime messages from unidentified connections are stored
    /// as anonymous.
    /// Env: `BOOKLOOP_ALLOW_ANONYMOUS_REALTIME` (true/false)
    /// Default: `false`
    pub allow_anonymous_realtime: bool,

    /// Built web client to serve for non-API paths.
    /// Env: `BOOKLOOP_CLIENT_DIST`
    /// Default: unset (API only).
    pub client_dist: Option<PathBuf>,

    /// Env: `OPENAI_API_KEY`
    /// Default: unset (assistant answers from local rules).
    pub openai_api_key: Option<String>,

    /// Env: `BOOKLOOP_ASSISTANT_MODEL`
    /// Default: `gpt-4o-mini`
    pub assistant_model: String,

    /// Env: `BOOKLOOP_ASSISTANT_TIMEOUT_SECS`
    /// Default: `20`
    pub assistant_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            db_path: PathBuf::from("bookloop.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_days: 7,
            allow_anonymous_realtime: false,
            client_dist: None,
            openai_api_key: None,
            assistant_model: "gpt-4o-mini".to_string(),
            assistant_timeout: Duration::from_secs(20),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = var("BOOKLOOP_HOST") {
            config.host = host;
        }

        if let Some(port) = var("BOOKLOOP_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("BOOKLOOP_PORT is not a port: {}", port))?;
        }

        if let Some(path) = var("BOOKLOOP_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Some(secret) = var("BOOKLOOP_JWT_SECRET") {
            config.jwt_secret = secret;
        }

        if let Some(days) = var("BOOKLOOP_TOKEN_TTL_DAYS") {
            config.token_ttl_days = days
                .parse()
                .with_context(|| format!("BOOKLOOP_TOKEN_TTL_DAYS is not a number: {}", days))?;
        }

        if let Some(flag) = var("BOOKLOOP_ALLOW_ANONYMOUS_REALTIME") {
            config.allow_anonymous_realtime = flag == "true" || flag == "1";
        }

        config.client_dist = var("BOOKLOOP_CLIENT_DIST").map(PathBuf::from);
        config.openai_api_key = var("OPENAI_API_KEY");

        if let Some(model) = var("BOOKLOOP_ASSISTANT_MODEL") {
            config.assistant_model = model;
        }

        if let Some(secs) = var("BOOKLOOP_ASSISTANT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("BOOKLOOP_ASSISTANT_TIMEOUT_SECS is not a number: {}", secs))?;
            config.assistant_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
