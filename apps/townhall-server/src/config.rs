use std::net::SocketAddr;
use std::time::Duration;

use townhall_events::DEFAULT_SUBSCRIBER_CAPACITY;

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid TOWNHALL_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid TOWNHALL_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid TOWNHALL_BIND: {0}")]
    InvalidBind(String),
    #[error("invalid TOWNHALL_BUS_CAPACITY: {0}")]
    InvalidBusCapacity(String),
    #[error("invalid TOWNHALL_SSE_KEEPALIVE_SECS: {0}")]
    InvalidKeepAlive(String),
    #[error("TOWNHALL_BIND={bind} is public and TOWNHALL_SESSION_TOKENS is not set; refusing to start")]
    MissingSessionTokens { bind: String },
}

#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub addr: SocketAddr,
    pub concurrency_limit: usize,
    /// Depth of each connection's bus channel before it counts as lagging.
    pub bus_capacity: usize,
    pub keepalive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8092)),
            concurrency_limit: 1024,
            bus_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            keepalive: Duration::from_secs(15),
        }
    }
}

pub(crate) fn http_config_from_env() -> Result<ServerConfig, HttpConfigError> {
    let concurrency_limit: usize =
        parse_env("TOWNHALL_HTTP_MAX_CONC", HttpConfigError::InvalidConcurrency)?.unwrap_or(1024);
    if concurrency_limit == 0 {
        return Err(HttpConfigError::InvalidConcurrency("0".into()));
    }
    let bus_capacity = parse_env("TOWNHALL_BUS_CAPACITY", HttpConfigError::InvalidBusCapacity)?
        .filter(|c: &usize| *c > 0)
        .unwrap_or(DEFAULT_SUBSCRIBER_CAPACITY);
    let keepalive_secs: u64 =
        parse_env("TOWNHALL_SSE_KEEPALIVE_SECS", HttpConfigError::InvalidKeepAlive)?
            .unwrap_or(15)
            .max(1);

    let bind = std::env::var("TOWNHALL_BIND").unwrap_or_else(|_| "127.0.0.1".into());
    let port_raw = std::env::var("TOWNHALL_PORT").unwrap_or_else(|_| "8092".into());
    let port: u16 = port_raw
        .parse()
        .map_err(|_| HttpConfigError::InvalidPort(port_raw))?;

    enforce_session_guard(&bind)?;

    let host = if bind.contains(':') && !bind.starts_with('[') {
        format!("[{bind}]")
    } else {
        bind.clone()
    };
    let addr = format!("{host}:{port}")
        .parse()
        .map_err(|_| HttpConfigError::InvalidBind(bind.clone()))?;

    Ok(ServerConfig {
        addr,
        concurrency_limit,
        bus_capacity,
        keepalive: Duration::from_secs(keepalive_secs),
    })
}

fn parse_env<T: std::str::FromStr>(
    key: &str,
    err: fn(String) -> HttpConfigError,
) -> Result<Option<T>, HttpConfigError> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().parse().map_err(|_| err(raw)))
        .transpose()
}

fn enforce_session_guard(bind: &str) -> Result<(), HttpConfigError> {
    let tokens_set = std::env::var("TOWNHALL_SESSION_TOKENS")
        .ok()
        .is_some_and(|v| !v.trim().is_empty());
    let bind_lower = bind.trim().to_ascii_lowercase();
    let is_loopback = matches!(
        bind_lower.as_str(),
        "127.0.0.1" | "::1" | "[::1]" | "localhost"
    );
    if !is_loopback && !tokens_set {
        return Err(HttpConfigError::MissingSessionTokens {
            bind: bind.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn env_truthy(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on" | "debug"
            )
        })
        .unwrap_or(false)
}
