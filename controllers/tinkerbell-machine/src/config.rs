//! Controller configuration.
//!
//! Read once at start-up from environment variables. Any value that fails to
//! parse stops the process.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default metadata endpoint written into the provisioned host's cloud-init config
pub const DEFAULT_METADATA_URL: &str = "http://tinkerbell.tinkerbell:50061";

/// Runtime configuration for the machine controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Restrict watches to one namespace (`None` watches all namespaces)
    pub watch_namespace: Option<String>,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
    /// Watch-event debounce
    pub debounce: Duration,
    /// Requeue delay while owner or bootstrap data is not ready
    pub bootstrap_requeue: Duration,
    /// Error backoff lower bound in minutes
    pub backoff_min_minutes: u64,
    /// Error backoff upper bound in minutes
    pub backoff_max_minutes: u64,
    /// Requeue delay after an optimistic-concurrency conflict
    pub conflict_requeue: Duration,
    /// Listen address for metrics and health probes
    pub probe_addr: SocketAddr,
    /// Metadata service URL used by the default provisioning template
    pub metadata_url: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            concurrency: 5,
            debounce: Duration::from_secs(1),
            bootstrap_requeue: Duration::from_secs(30),
            backoff_min_minutes: 1,
            backoff_max_minutes: 10,
            conflict_requeue: Duration::from_secs(2),
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metadata_url: DEFAULT_METADATA_URL.to_string(),
        }
    }
}

fn parse<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T, ControllerError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{} has invalid value {:?}", name, raw))
        }),
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();

        let concurrency = parse("RECONCILE_CONCURRENCY", lookup("RECONCILE_CONCURRENCY"), defaults.concurrency)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let backoff_min_minutes = parse("BACKOFF_MIN_MINUTES", lookup("BACKOFF_MIN_MINUTES"), defaults.backoff_min_minutes)?;
        let backoff_max_minutes = parse("BACKOFF_MAX_MINUTES", lookup("BACKOFF_MAX_MINUTES"), defaults.backoff_max_minutes)?;
        if backoff_min_minutes == 0 || backoff_max_minutes < backoff_min_minutes {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff bounds {}m..{}m are invalid",
                backoff_min_minutes, backoff_max_minutes
            )));
        }

        let seconds = |name: &str, default: Duration| -> Result<Duration, ControllerError> {
            parse(name, lookup(name), default.as_secs()).map(Duration::from_secs)
        };

        Ok(Self {
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty()),
            concurrency,
            debounce: seconds("DEBOUNCE_SECONDS", defaults.debounce)?,
            bootstrap_requeue: seconds("BOOTSTRAP_REQUEUE_SECONDS", defaults.bootstrap_requeue)?,
            backoff_min_minutes,
            backoff_max_minutes,
            conflict_requeue: seconds("CONFLICT_REQUEUE_SECONDS", defaults.conflict_requeue)?,
            probe_addr: parse("PROBE_ADDR", lookup("PROBE_ADDR"), defaults.probe_addr)?,
            metadata_url: lookup("METADATA_URL").unwrap_or(defaults.metadata_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.bootstrap_requeue, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "tink-system"),
            ("RECONCILE_CONCURRENCY", "12"),
            ("CONFLICT_REQUEUE_SECONDS", "5"),
            ("PROBE_ADDR", "127.0.0.1:9090"),
        ]))
        .unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("tink-system"));
        assert_eq!(config.concurrency, 12);
        assert_eq!(config.conflict_requeue, Duration::from_secs(5));
        assert_eq!(config.probe_addr, "127.0.0.1:9090".parse().unwrap());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ControllerConfig::from_lookup(lookup(&[("RECONCILE_CONCURRENCY", "many")])).is_err());
        assert!(ControllerConfig::from_lookup(lookup(&[("RECONCILE_CONCURRENCY", "0")])).is_err());
        assert!(ControllerConfig::from_lookup(lookup(&[
            ("BACKOFF_MIN_MINUTES", "5"),
            ("BACKOFF_MAX_MINUTES", "2"),
        ]))
        .is_err());
        assert!(ControllerConfig::from_lookup(lookup(&[("PROBE_ADDR", "nowhere")])).is_err());
    }
}
