//! Client polling interval selection.
//!
//! Clients poll a request's status while they watch it. The interval adapts
//! to load:
//!
//! - **Rate limited**: fixed backoff, regardless of status class
//! - **Terminal**: zero, meaning stop polling
//! - **Hidden tab / backgrounded process**: longest interval
//! - **Active** (planning, applying, destroying): short interval
//! - **Idle**: longer interval
//!
//! The four intervals are configurable via environment variables; zero or
//! unparseable values fall back to the defaults.

use std::time::Duration;

use tracing::warn;

use crate::lifecycle::{CanonicalStatus, StatusClass};

/// Default interval while an operation is in flight (5 seconds).
const DEFAULT_ACTIVE_INTERVAL_SECS: u64 = 5;

/// Default interval while waiting on a decision (30 seconds).
const DEFAULT_IDLE_INTERVAL_SECS: u64 = 30;

/// Default interval when the client is not visible (60 seconds).
const DEFAULT_HIDDEN_INTERVAL_SECS: u64 = 60;

/// Default backoff after the provider rate-limited us (60 seconds).
const DEFAULT_RATE_LIMIT_BACKOFF_SECS: u64 = 60;

pub const ENV_ACTIVE_INTERVAL: &str = "TF_LIFECYCLE_POLL_ACTIVE_SECS";
pub const ENV_IDLE_INTERVAL: &str = "TF_LIFECYCLE_POLL_IDLE_SECS";
pub const ENV_HIDDEN_INTERVAL: &str = "TF_LIFECYCLE_POLL_HIDDEN_SECS";
pub const ENV_RATE_LIMIT_BACKOFF: &str = "TF_LIFECYCLE_POLL_RATE_LIMIT_BACKOFF_SECS";

/// Configuration for client polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    pub active_interval: Duration,
    pub idle_interval: Duration,
    pub hidden_interval: Duration,
    pub rate_limit_backoff: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingConfig {
    /// Creates a `PollingConfig` with default values.
    pub fn new() -> Self {
        PollingConfig {
            active_interval: Duration::from_secs(DEFAULT_ACTIVE_INTERVAL_SECS),
            idle_interval: Duration::from_secs(DEFAULT_IDLE_INTERVAL_SECS),
            hidden_interval: Duration::from_secs(DEFAULT_HIDDEN_INTERVAL_SECS),
            rate_limit_backoff: Duration::from_secs(DEFAULT_RATE_LIMIT_BACKOFF_SECS),
        }
    }

    /// Creates a `PollingConfig` from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates a `PollingConfig` from an arbitrary variable lookup.
    ///
    /// Each value must be a positive integer number of seconds; anything else
    /// falls back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str, default: u64| {
            Duration::from_secs(positive_secs(name, lookup(name).as_deref(), default))
        };

        PollingConfig {
            active_interval: read(ENV_ACTIVE_INTERVAL, DEFAULT_ACTIVE_INTERVAL_SECS),
            idle_interval: read(ENV_IDLE_INTERVAL, DEFAULT_IDLE_INTERVAL_SECS),
            hidden_interval: read(ENV_HIDDEN_INTERVAL, DEFAULT_HIDDEN_INTERVAL_SECS),
            rate_limit_backoff: read(ENV_RATE_LIMIT_BACKOFF, DEFAULT_RATE_LIMIT_BACKOFF_SECS),
        }
    }
}

fn positive_secs(name: &str, raw: Option<&str>, default: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => secs,
        _ => {
            warn!(variable = name, value = raw, default, "Invalid polling interval, using default");
            default
        }
    }
}

/// Returns how long a client should wait before polling again.
///
/// [`Duration::ZERO`] means stop polling.
pub fn polling_interval(
    status: CanonicalStatus,
    tab_hidden: bool,
    rate_limited: bool,
    config: &PollingConfig,
) -> Duration {
    if rate_limited {
        return config.rate_limit_backoff;
    }
    match status.class() {
        StatusClass::Terminal => Duration::ZERO,
        _ if tab_hidden => config.hidden_interval,
        StatusClass::Active => config.active_interval,
        StatusClass::Idle => config.idle_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = PollingConfig::new();

        assert_eq!(config.active_interval, Duration::from_secs(5));
        assert_eq!(config.idle_interval, Duration::from_secs(30));
        assert_eq!(config.hidden_interval, Duration::from_secs(60));
        assert_eq!(config.rate_limit_backoff, Duration::from_secs(60));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = PollingConfig::from_lookup(lookup(&[
            (ENV_ACTIVE_INTERVAL, "2"),
            (ENV_IDLE_INTERVAL, "20"),
            (ENV_HIDDEN_INTERVAL, "120"),
            (ENV_RATE_LIMIT_BACKOFF, "300"),
        ]));

        assert_eq!(config.active_interval, Duration::from_secs(2));
        assert_eq!(config.idle_interval, Duration::from_secs(20));
        assert_eq!(config.hidden_interval, Duration::from_secs(120));
        assert_eq!(config.rate_limit_backoff, Duration::from_secs(300));
    }

    #[test]
    fn misconfigured_values_fall_back() {
        let config = PollingConfig::from_lookup(lookup(&[
            (ENV_ACTIVE_INTERVAL, "0"),
            (ENV_IDLE_INTERVAL, "-4"),
            (ENV_HIDDEN_INTERVAL, "soon"),
        ]));

        assert_eq!(config, PollingConfig::new());
    }

    #[test]
    fn interval_by_class() {
        let config = PollingConfig::new();

        assert_eq!(
            polling_interval(CanonicalStatus::Applying, false, false, &config),
            config.active_interval
        );
        assert_eq!(
            polling_interval(CanonicalStatus::Merged, false, false, &config),
            config.idle_interval
        );
        assert_eq!(
            polling_interval(CanonicalStatus::Planning, true, false, &config),
            config.hidden_interval
        );
    }

    #[test]
    fn terminal_stops_polling() {
        let config = PollingConfig::new();
        for status in CanonicalStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert_eq!(polling_interval(status, false, false, &config), Duration::ZERO);
            assert_eq!(polling_interval(status, true, false, &config), Duration::ZERO);
        }
    }

    #[test]
    fn rate_limit_overrides_everything() {
        let config = PollingConfig::new();
        for status in CanonicalStatus::ALL {
            for hidden in [false, true] {
                assert_eq!(
                    polling_interval(status, hidden, true, &config),
                    config.rate_limit_backoff
                );
            }
        }
    }
}
