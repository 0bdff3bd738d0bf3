//! Process configuration, read once from `PARKSPACE_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const WAL_FILE_NAME: &str = "parkspace.wal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// Compact once this many events were appended since the last rewrite.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub tls: Option<TlsPaths>,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("both PARKSPACE_TLS_CERT and PARKSPACE_TLS_KEY must be set, or neither")]
    TlsPair,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process env.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tls = match (get("PARKSPACE_TLS_CERT"), get("PARKSPACE_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::TlsPair),
        };

        let max_connections: usize = parsed(&get, "PARKSPACE_MAX_CONNECTIONS")?.unwrap_or(256);
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "PARKSPACE_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            bind: get("PARKSPACE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "PARKSPACE_PORT")?.unwrap_or(5433),
            data_dir: get("PARKSPACE_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: get("PARKSPACE_PASSWORD").unwrap_or_else(|| "parkspace".into()),
            max_connections,
            compact_threshold: parsed(&get, "PARKSPACE_COMPACT_THRESHOLD")?.unwrap_or(1000),
            compact_interval: Duration::from_secs(
                parsed(&get, "PARKSPACE_COMPACT_INTERVAL_SECS")?.unwrap_or(30),
            ),
            tls,
            metrics_port: parsed(&get, "PARKSPACE_METRICS_PORT")?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}

fn parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(var)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
