//! Service configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;
use thiserror::Error;

use crate::metrics::DEFAULT_SUMMARY_TTL_SECS;
use crate::polling::PollingConfig;
use crate::repair::{DEFAULT_DESTROY_STALE_AFTER_SECS, RepairPolicy};
use crate::stream::DEFAULT_STREAM_CAPACITY;

pub const ENV_BIND: &str = "TF_LIFECYCLE_BIND";
pub const ENV_WEBHOOK_SECRET: &str = "TF_LIFECYCLE_WEBHOOK_SECRET";
pub const ENV_STATE_DIR: &str = "TF_LIFECYCLE_STATE_DIR";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_DESTROY_WORKFLOW: &str = "TF_LIFECYCLE_DESTROY_WORKFLOW";
pub const ENV_DESTROY_STALE_SECS: &str = "TF_LIFECYCLE_DESTROY_STALE_SECS";
pub const ENV_STREAM_CAPACITY: &str = "TF_LIFECYCLE_STREAM_CAPACITY";
pub const ENV_SUMMARY_TTL_SECS: &str = "TF_LIFECYCLE_SUMMARY_TTL_SECS";

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_STATE_DIR: &str = "./state";
const DEFAULT_DESTROY_WORKFLOW: &str = "destroy.yml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub webhook_secret: Vec<u8>,
    pub state_dir: PathBuf,
    pub github_token: String,
    pub destroy_workflow: String,
    pub polling: PollingConfig,
    pub repair: RepairPolicy,
    pub stream_capacity: usize,
    pub summary_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| optional(name).ok_or(ConfigError::Missing(name));

        let bind_raw = optional(ENV_BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: ENV_BIND,
            value: bind_raw.clone(),
        })?;

        let destroy_stale_secs: i64 = parse_positive(
            ENV_DESTROY_STALE_SECS,
            optional(ENV_DESTROY_STALE_SECS),
            DEFAULT_DESTROY_STALE_AFTER_SECS,
        )?;
        let stream_capacity: usize = parse_positive(
            ENV_STREAM_CAPACITY,
            optional(ENV_STREAM_CAPACITY),
            DEFAULT_STREAM_CAPACITY,
        )?;
        let summary_ttl_secs: i64 = parse_positive(
            ENV_SUMMARY_TTL_SECS,
            optional(ENV_SUMMARY_TTL_SECS),
            DEFAULT_SUMMARY_TTL_SECS,
        )?;

        Ok(Config {
            bind,
            webhook_secret: required(ENV_WEBHOOK_SECRET)?.into_bytes(),
            state_dir: optional(ENV_STATE_DIR)
                .unwrap_or_else(|| DEFAULT_STATE_DIR.to_string())
                .into(),
            github_token: required(ENV_GITHUB_TOKEN)?,
            destroy_workflow: optional(ENV_DESTROY_WORKFLOW)
                .unwrap_or_else(|| DEFAULT_DESTROY_WORKFLOW.to_string()),
            polling: PollingConfig::from_lookup(&lookup),
            repair: RepairPolicy {
                destroy_stale_after: Duration::seconds(destroy_stale_secs),
            },
            stream_capacity,
            summary_ttl: Duration::seconds(summary_ttl_secs),
        })
    }
}

fn parse_positive<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::Invalid { name, value: raw }),
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

    const REQUIRED: [(&str, &str); 2] = [(ENV_WEBHOOK_SECRET, "s3cret"), (ENV_GITHUB_TOKEN, "ghp_x")];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.bind, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.webhook_secret, b"s3cret");
        assert_eq!(config.state_dir, PathBuf::from("./state"));
        assert_eq!(config.destroy_workflow, "destroy.yml");
        assert_eq!(config.polling, PollingConfig::new());
        assert_eq!(config.repair, RepairPolicy::default());
        assert_eq!(config.stream_capacity, 200);
        assert_eq!(config.summary_ttl, Duration::seconds(30));
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = Config::from_lookup(lookup(&[(ENV_GITHUB_TOKEN, "ghp_x")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(ENV_WEBHOOK_SECRET));
    }

    #[test]
    fn overrides_are_read() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            (ENV_BIND, "127.0.0.1:8080"),
            (ENV_STATE_DIR, "/var/lib/tf"),
            (ENV_DESTROY_STALE_SECS, "120"),
            (ENV_STREAM_CAPACITY, "50"),
            ("TF_LIFECYCLE_POLL_ACTIVE_SECS", "2"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/tf"));
        assert_eq!(config.repair.destroy_stale_after, Duration::seconds(120));
        assert_eq!(config.stream_capacity, 50);
        assert_eq!(config.polling.active_interval, std::time::Duration::from_secs(2));
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let mut vars = REQUIRED.to_vec();
        vars.push((ENV_STREAM_CAPACITY, "0"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid {
                name: ENV_STREAM_CAPACITY,
                ..
            })
        ));
    }
}
