//! Controller configuration.
//!
//! Read once at startup from environment variables.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default namespace of keepalived groups
pub const DEFAULT_KEEPALIVED_GROUP_NAMESPACE: &str = "keepalived-operator";

/// Runtime configuration of the VirtualIP Controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace used in the keepalived group annotation value
    pub keepalived_group_namespace: String,
    /// Namespace to watch (all namespaces when `None`)
    pub watch_namespace: Option<String>,
    /// Skip network and broadcast addresses of each segment
    pub exclude_subnet_boundaries: bool,
    /// Listen address of the probes/metrics server
    pub probe_addr: SocketAddr,
    /// Maximum concurrent reconciliations
    pub reconcile_concurrency: u16,
    /// Debounce applied to watch events
    pub debounce: Duration,
    /// Minimum requeue delay after a failed reconciliation, in seconds
    pub backoff_min_seconds: u64,
    /// Maximum requeue delay after a failed reconciliation, in seconds
    pub backoff_max_seconds: u64,
}

impl ControllerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; unset and empty values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            keepalived_group_namespace: get("KEEPALIVED_GROUP_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_KEEPALIVED_GROUP_NAMESPACE.to_string()),
            watch_namespace: get("WATCH_NAMESPACE"),
            exclude_subnet_boundaries: parse(get("EXCLUDE_SUBNET_BOUNDARIES"), "EXCLUDE_SUBNET_BOUNDARIES", false)?,
            probe_addr: parse(get("PROBE_ADDR"), "PROBE_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            reconcile_concurrency: parse(get("RECONCILE_CONCURRENCY"), "RECONCILE_CONCURRENCY", 3)?,
            debounce: Duration::from_secs(parse(get("DEBOUNCE_SECONDS"), "DEBOUNCE_SECONDS", 1)?),
            backoff_min_seconds: parse(get("BACKOFF_MIN_SECONDS"), "BACKOFF_MIN_SECONDS", 5)?,
            backoff_max_seconds: parse(get("BACKOFF_MAX_SECONDS"), "BACKOFF_MAX_SECONDS", 300)?,
        };

        if config.reconcile_concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if config.backoff_min_seconds == 0 || config.backoff_min_seconds > config.backoff_max_seconds {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff bounds must satisfy 0 < BACKOFF_MIN_SECONDS ({}) <= BACKOFF_MAX_SECONDS ({})",
                config.backoff_min_seconds, config.backoff_max_seconds
            )));
        }

        Ok(config)
    }
}

fn parse<T>(value: Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}
