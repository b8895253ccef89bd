use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{BrokerError, Result};

/// Default master listen port.
pub const DEFAULT_MASTER_PORT: u16 = 3224;

/// Bound on every socket connect and on reads in the worker's waiting states.
pub const CONNECT_TIMEOUT_MS: u64 = 5000;

/// Maximum accepted line length before the socket is closed.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub listen_addr: SocketAddr,
    /// Inter-poll pause of the pairing loop when either queue is empty.
    pub pair_poll_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_line_bytes: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", DEFAULT_MASTER_PORT).parse().unwrap(),
            pair_poll_ms: 100,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl MasterConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn pair_poll(&self) -> Duration {
        Duration::from_millis(self.pair_poll_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Address of the master this worker registers with.
    pub master_addr: String,
    pub connect_timeout_ms: u64,
    /// Pause between retries of a failed master connect.
    pub sleep_time_ms: u64,
    pub max_line_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_addr: format!("127.0.0.1:{}", DEFAULT_MASTER_PORT),
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            sleep_time_ms: 400,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl WorkerConfig {
    pub fn new(master_addr: String) -> Self {
        Self {
            master_addr,
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sleep_time(&self) -> Duration {
        Duration::from_millis(self.sleep_time_ms)
    }
}

/// Database credentials, all four required at worker startup.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub name: String,
    pub user: String,
    pub pass: String,
}

impl DbConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup, so tests don't mutate process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key).ok_or_else(|| BrokerError::Config(format!("missing env var {key}")))
        };
        Ok(Self {
            host: require("DBHOST")?,
            name: require("DBNAME")?,
            user: require("DBUSR")?,
            pass: require("DBPASS")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_config_requires_all_vars() {
        let full = |key: &str| {
            Some(
                match key {
                    "DBHOST" => "localhost",
                    "DBNAME" => ":memory:",
                    "DBUSR" => "svc",
                    "DBPASS" => "secret",
                    _ => return None,
                }
                .to_string(),
            )
        };
        let cfg = DbConfig::from_lookup(full).unwrap();
        assert_eq!(cfg.name, ":memory:");

        let missing_pass = |key: &str| match key {
            "DBPASS" => None,
            other => full(other),
        };
        let err = DbConfig::from_lookup(missing_pass).unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)));
    }
}
