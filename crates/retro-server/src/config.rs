use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime settings, read from `RETRO_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub assets: PathBuf,
    pub audience: String,
    /// Enables the test identity provider and `/reset`.
    pub test_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: "retro.db".into(),
            assets: "app/dist".into(),
            audience: "retro".into(),
            test_mode: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let port = match var("RETRO_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("RETRO_PORT must be a port number, got {port:?}"))?,
            None => defaults.port,
        };

        Ok(Self {
            host: var("RETRO_HOST").unwrap_or(defaults.host),
            port,
            db_path: var("RETRO_DB_PATH").map_or(defaults.db_path, PathBuf::from),
            assets: var("RETRO_ASSETS").map_or(defaults.assets, PathBuf::from),
            audience: var("RETRO_AUDIENCE").unwrap_or(defaults.audience),
            test_mode: var("RETRO_TEST_MODE").is_some_and(|v| matches!(v.as_str(), "1" | "true")),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}
