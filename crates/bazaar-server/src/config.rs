use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use bazaar_gateway::bus::DEFAULT_QUEUE_CAPACITY;
use bazaar_gateway::stream::DEFAULT_KEEP_ALIVE;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    /// Per-stream event queue depth.
    pub stream_queue: usize,
    pub stream_keep_alive: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("BAZAAR_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("BAZAAR_JWT_SECRET is unset or still a placeholder");
        }

        let db_path = var("BAZAAR_DB_PATH").unwrap_or_else(|| "bazaar.db".into()).into();
        let host = var("BAZAAR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("BAZAAR_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("BAZAAR_PORT must be a port number")?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let stream_queue = match var("BAZAAR_STREAM_QUEUE") {
            Some(v) => v.parse().context("BAZAAR_STREAM_QUEUE must be a number")?,
            None => DEFAULT_QUEUE_CAPACITY,
        };
        let stream_keep_alive = match var("BAZAAR_STREAM_KEEPALIVE_SECS") {
            Some(v) => Duration::from_secs(v.parse().context("BAZAAR_STREAM_KEEPALIVE_SECS must be a number")?),
            None => DEFAULT_KEEP_ALIVE,
        };

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            stream_queue,
            stream_keep_alive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_a_secret() {
        let cfg = config(&[("BAZAAR_JWT_SECRET", "f00dfeed")]).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("bazaar.db"));
        assert_eq!(cfg.stream_queue, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(cfg.stream_keep_alive, DEFAULT_KEEP_ALIVE);
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("BAZAAR_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("BAZAAR_JWT_SECRET", "f00dfeed"),
            ("BAZAAR_HOST", "127.0.0.1"),
            ("BAZAAR_PORT", "8080"),
            ("BAZAAR_STREAM_QUEUE", "64"),
            ("BAZAAR_STREAM_KEEPALIVE_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.stream_queue, 64);
        assert_eq!(cfg.stream_keep_alive, Duration::from_secs(5));

        assert!(config(&[("BAZAAR_JWT_SECRET", "x"), ("BAZAAR_PORT", "http")]).is_err());
    }
}
