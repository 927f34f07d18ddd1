use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid socket address: {value}")]
    InvalidAddress { var: &'static str, value: String },

    #[error("{var} is not a whole number of seconds: {value}")]
    InvalidSeconds { var: &'static str, value: String },
}

/// Runtime settings of the operator, read once from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where the health, metrics and diagnostics server listens
    pub listen: SocketAddr,

    /// Only watch plexes in this namespace, or everywhere when unset
    pub namespace: Option<String>,

    /// How soon to look again after creating or rescaling a deployment
    pub requeue_after: Duration,

    /// How soon to retry a failed reconcile
    pub retry_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            namespace: None,
            requeue_after: Duration::from_secs(10),
            retry_after: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build the config from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let seconds = |var: &'static str, default: Duration| match lookup(var) {
            Some(value) => value
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidSeconds { var, value }),
            None => Ok(default),
        };

        let listen = match lookup("PLEX_OPERATOR_LISTEN") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidAddress {
                var: "PLEX_OPERATOR_LISTEN",
                value,
            })?,
            None => defaults.listen,
        };

        Ok(Self {
            listen,
            namespace: lookup("PLEX_OPERATOR_NAMESPACE").filter(|ns| !ns.is_empty()),
            requeue_after: seconds("PLEX_OPERATOR_REQUEUE_SECS", defaults.requeue_after)?,
            retry_after: seconds("PLEX_OPERATOR_RETRY_SECS", defaults.retry_after)?,
        })
    }
}
