//! Client configuration.

use channel_client_core::TransportConfig;
use channel_client_executor::{ExecutorConfig, FloodPolicy};
use serde::{Deserialize, Serialize};

/// Configuration for a [`ChannelClient`](crate::ChannelClient).
///
/// Loadable from JSON, e.g.
/// `{"transport": {"api_id": 1, "api_hash": "abc"}, "executor": {"flood_policy": "fail"}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Credentials handed to the transport on connect.
    pub transport: TransportConfig,
    /// Retry and spacing behavior.
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl ClientConfig {
    /// Create a config for the given application credentials.
    #[must_use]
    pub fn new(api_id: i64, api_hash: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig {
                api_id,
                api_hash: api_hash.into(),
                test: false,
            },
            executor: ExecutorConfig::default(),
        }
    }

    /// Parse a JSON config.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or misses required fields.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Use the remote test environment.
    #[must_use]
    pub const fn with_test_servers(mut self, test: bool) -> Self {
        self.transport.test = test;
        self
    }

    /// Set the rate-limit policy.
    #[must_use]
    pub const fn with_flood_policy(mut self, policy: FloodPolicy) -> Self {
        self.executor.flood_policy = policy;
        self
    }

    /// Replace the executor configuration.
    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_config_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{"transport": {"api_id": 17, "api_hash": "abc"}}"#,
        )
        .unwrap();
        assert_eq!(config.transport.api_id, 17);
        assert!(!config.transport.test);
        assert_eq!(config.executor.flood_policy, FloodPolicy::Backoff);
        assert_eq!(config.executor.request_spacing_ms, 50);
        assert!(config.executor.serialize_requests);
    }

    #[test]
    fn test_json_config_overrides() {
        let config = ClientConfig::from_json_str(
            r#"{
                "transport": {"api_id": 1, "api_hash": "h", "test": true},
                "executor": {"flood_policy": "fail", "request_spacing_ms": 0}
            }"#,
        )
        .unwrap();
        assert!(config.transport.test);
        assert_eq!(config.executor.flood_policy, FloodPolicy::Fail);
        assert_eq!(config.executor.request_spacing_ms, 0);
        assert!(config.executor.serialize_requests);
    }

    #[test]
    fn test_missing_transport_is_rejected() {
        assert!(ClientConfig::from_json_str("{}").is_err());
    }
}
