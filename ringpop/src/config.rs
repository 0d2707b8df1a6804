use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::listener::DEFAULT_QUEUE_CAPACITY;
use crate::ring::DEFAULT_REPLICA_POINTS;
use crate::stats::DEFAULT_NAMESPACE;
use crate::{Error, Result};

const DEFAULT_MAX_JOIN_DURATION_MS: u64 = 120_000;
const DEFAULT_JOIN_TIMEOUT_MS: u64 = 1_000;

/// Options for [`crate::ClusterCoordinator::bootstrap`].
///
/// An empty `hosts` list forms a single-node cluster seeded by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    pub hosts: Vec<String>,
    /// Upper bound for the whole bootstrap call.
    #[serde(rename = "max_join_duration_ms", with = "duration_ms")]
    pub max_join_duration: Duration,
    /// Upper bound for contacting a single seed.
    #[serde(rename = "join_timeout_ms", with = "duration_ms")]
    pub join_timeout: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            max_join_duration: Duration::from_millis(DEFAULT_MAX_JOIN_DURATION_MS),
            join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
        }
    }
}

impl BootstrapOptions {
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn max_join_duration(mut self, duration: Duration) -> Self {
        self.max_join_duration = duration;
        self
    }
}

/// Static coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Application name; also the cluster namespace.
    pub app: String,
    /// This node's `host:port`.
    pub identity: String,
    pub stats_namespace: String,
    pub replica_points: usize,
    pub listener_queue_capacity: usize,
}

impl Options {
    pub fn new(app: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            identity: identity.into(),
            stats_namespace: DEFAULT_NAMESPACE.to_string(),
            replica_points: DEFAULT_REPLICA_POINTS,
            listener_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Load from `RINGPOP_APP`, `RINGPOP_IDENTITY`, `RINGPOP_STATS_NAMESPACE`
    /// and `RINGPOP_REPLICA_POINTS`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self> {
        let app = env::var("RINGPOP_APP")
            .map_err(|_| Error::Config("RINGPOP_APP is not set".into()))?;
        let identity = env::var("RINGPOP_IDENTITY")
            .map_err(|_| Error::Config("RINGPOP_IDENTITY is not set".into()))?;

        let mut options = Self::new(app, identity);
        if let Ok(namespace) = env::var("RINGPOP_STATS_NAMESPACE") {
            options.stats_namespace = namespace;
        }
        if let Ok(points) = env::var("RINGPOP_REPLICA_POINTS") {
            options.replica_points = points.parse().map_err(|_| {
                Error::Config(format!("RINGPOP_REPLICA_POINTS is not a number: {points}"))
            })?;
        }

        options.validate()?;
        Ok(options)
    }

    /// # Errors
    ///
    /// Returns an error if the app name is empty, the identity is not
    /// `host:port`, or replica points is zero.
    pub fn validate(&self) -> Result<()> {
        if self.app.is_empty() {
            return Err(Error::Config("app name must not be empty".into()));
        }
        validate_identity(&self.identity)?;
        if self.replica_points == 0 {
            return Err(Error::Config("replica points must be at least 1".into()));
        }
        Ok(())
    }
}

fn validate_identity(identity: &str) -> Result<()> {
    let (host, port) = identity
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("identity must be host:port, got {identity:?}")))?;
    if host.is_empty() {
        return Err(Error::Config(format!("identity has no host: {identity:?}")));
    }
    port.parse::<u16>()
        .map_err(|_| Error::Config(format!("identity has an invalid port: {identity:?}")))?;
    Ok(())
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_options_defaults() {
        let options = BootstrapOptions::default();
        assert!(options.hosts.is_empty());
        assert_eq!(options.max_join_duration, Duration::from_secs(120));
        assert_eq!(options.join_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_bootstrap_options_from_json() {
        let options: BootstrapOptions = serde_json::from_str(
            r#"{"hosts":["127.0.0.1:9000","127.0.0.1:9001"],"max_join_duration_ms":1}"#,
        )
        .unwrap();
        assert_eq!(options.hosts.len(), 2);
        assert_eq!(options.max_join_duration, Duration::from_millis(1));
        assert_eq!(options.join_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_identity_validation() {
        assert!(validate_identity("127.0.0.1:3001").is_ok());
        assert!(validate_identity("node-a.internal:80").is_ok());
        assert!(validate_identity("127.0.0.1").is_err());
        assert!(validate_identity(":3001").is_err());
        assert!(validate_identity("127.0.0.1:http").is_err());
        assert!(validate_identity("127.0.0.1:70000").is_err());
    }

    #[test]
    fn test_options_validate() {
        assert!(Options::new("test", "127.0.0.1:3001").validate().is_ok());
        assert!(Options::new("", "127.0.0.1:3001").validate().is_err());

        let mut options = Options::new("test", "127.0.0.1:3001");
        options.replica_points = 0;
        assert!(options.validate().is_err());
    }
}
