//! Server configuration, read from `PARLEY_*` environment variables.
//! Every setting has a default, so an empty environment is valid.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::http::HeaderValue;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Browser origin allowed by CORS.
    pub client_url: String,
    pub host: String,
    pub port: u16,
    /// Directory served for paths no route matches.
    pub static_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = var("PARLEY_PORT", "5000");
        let port = port
            .parse::<u16>()
            .with_context(|| format!("PARLEY_PORT is not a valid port: {port}"))?;

        Ok(Self {
            db_path: var("PARLEY_DB_PATH", "parley.db").into(),
            client_url: var("PARLEY_CLIENT_URL", "http://localhost:5173"),
            host: var("PARLEY_HOST", "0.0.0.0"),
            port,
            static_dir: var("PARLEY_STATIC_DIR", "public").into(),
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn client_origin(&self) -> Result<HeaderValue> {
        HeaderValue::from_str(&self.client_url)
            .with_context(|| format!("PARLEY_CLIENT_URL is not a valid origin: {}", self.client_url))
    }
}
