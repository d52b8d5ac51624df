use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use parley_gateway::GatewayConfig;

/// Server settings, read from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Directory served for unmatched paths (the web client), if any
    pub static_dir: Option<PathBuf>,
    pub outbound_queue: usize,
    pub presence_debounce: Duration,
    pub session_sweep: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "PARLEY_PORT", 8080u16)?;
        let db_path = lookup("PARLEY_DB_PATH")
            .unwrap_or_else(|| "parley.db".into())
            .into();
        let static_dir = lookup("PARLEY_STATIC_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let outbound_queue = parse_or(&lookup, "PARLEY_OUTBOUND_QUEUE", 64usize)?;
        let debounce_ms = parse_or(&lookup, "PARLEY_PRESENCE_DEBOUNCE_MS", 100u64)?;
        let sweep_secs = parse_or(&lookup, "PARLEY_SESSION_SWEEP_SECS", 3600u64)?;

        if outbound_queue == 0 {
            anyhow::bail!("PARLEY_OUTBOUND_QUEUE must be at least 1");
        }
        if sweep_secs == 0 {
            anyhow::bail!("PARLEY_SESSION_SWEEP_SECS must be at least 1");
        }

        Ok(Self {
            host,
            port,
            db_path,
            static_dir,
            outbound_queue,
            presence_debounce: Duration::from_millis(debounce_ms),
            session_sweep: Duration::from_secs(sweep_secs),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {}", addr))
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            outbound_queue: self.outbound_queue,
            presence_debounce: self.presence_debounce,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr().unwrap().to_string(), "0.0.0.0:8080");
        assert_eq!(cfg.db_path, PathBuf::from("parley.db"));
        assert!(cfg.static_dir.is_none());
        assert_eq!(cfg.outbound_queue, 64);
        assert_eq!(cfg.presence_debounce, Duration::from_millis(100));
        assert_eq!(cfg.session_sweep, Duration::from_secs(3600));
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("PARLEY_HOST", "127.0.0.1"),
            ("PARLEY_PORT", "9000"),
            ("PARLEY_STATIC_DIR", "./web"),
            ("PARLEY_PRESENCE_DEBOUNCE_MS", "250"),
        ])
        .unwrap();
        assert_eq!(cfg.addr().unwrap().to_string(), "127.0.0.1:9000");
        assert_eq!(cfg.static_dir, Some(PathBuf::from("./web")));
        assert_eq!(cfg.gateway().presence_debounce, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("PARLEY_PORT", "eighty")]).is_err());
        assert!(config(&[("PARLEY_OUTBOUND_QUEUE", "0")]).is_err());
        assert!(config(&[("PARLEY_HOST", "not a host")]).unwrap().addr().is_err());
    }
}
