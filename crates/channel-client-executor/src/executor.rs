//! Retrying request executor.

use std::time::Duration;

use channel_client_core::TransportSession;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::retry::ErrorAction;

/// Default pause after each successful call.
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_millis(50);

/// Slack added on top of a flood wait.
const FLOOD_WAIT_SLACK: Duration = Duration::from_millis(1);

/// How rate-limit errors are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloodPolicy {
    /// Sleep for the requested duration, then retry.
    #[default]
    Backoff,
    /// Fail immediately with [`RequestError::FloodWait`].
    Fail,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Pause after each successful call, in milliseconds.
    pub request_spacing_ms: u64,
    /// Rate-limit handling.
    pub flood_policy: FloodPolicy,
    /// Serialize outbound calls so the spacing holds under concurrent callers.
    pub serialize_requests: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_spacing_ms: u64::try_from(DEFAULT_REQUEST_SPACING.as_millis()).unwrap_or(50),
            flood_policy: FloodPolicy::default(),
            serialize_requests: true,
        }
    }
}

impl ExecutorConfig {
    /// Pause after each successful call.
    #[must_use]
    pub const fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }

    /// Set the pause after each successful call.
    #[must_use]
    pub fn with_request_spacing(mut self, spacing: Duration) -> Self {
        self.request_spacing_ms = u64::try_from(spacing.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the rate-limit policy.
    #[must_use]
    pub const fn with_flood_policy(mut self, policy: FloodPolicy) -> Self {
        self.flood_policy = policy;
        self
    }

    /// Enable or disable call serialization.
    #[must_use]
    pub const fn with_serialized_requests(mut self, serialize: bool) -> Self {
        self.serialize_requests = serialize;
        self
    }
}

/// Request error surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Terminal remote error, message preserved verbatim.
    #[error("{0}")]
    Remote(String),
    /// Rate limited under [`FloodPolicy::Fail`].
    #[error("Too many requests, please try again in {seconds} seconds")]
    FloodWait { seconds: u64 },
}

/// Issues remote calls and recovers from migration, restart and rate-limit errors.
pub struct RequestExecutor {
    config: ExecutorConfig,
    gate: Mutex<()>,
}

impl Default for RequestExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl RequestExecutor {
    /// Create a new executor.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            gate: Mutex::new(()),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Issue `method` until it succeeds or fails terminally.
    ///
    /// Migration and restart errors are retried without limit. Rate limits
    /// follow the configured [`FloodPolicy`].
    ///
    /// # Errors
    /// Returns [`RequestError::Remote`] for unrecoverable remote errors and
    /// [`RequestError::FloodWait`] when rate limited under [`FloodPolicy::Fail`].
    pub async fn execute(
        &self,
        session: &dyn TransportSession,
        method: &str,
        params: &Value,
    ) -> Result<Value, RequestError> {
        let _guard = if self.config.serialize_requests {
            Some(self.gate.lock().await)
        } else {
            None
        };

        let mut attempt: u32 = 0;
        let response = loop {
            attempt += 1;
            let error = match session.call(method, params.clone()).await {
                Ok(response) => break response,
                Err(error) => error,
            };

            match ErrorAction::classify(&error.message) {
                ErrorAction::Migrate(dc) => {
                    tracing::debug!(method, attempt, dc, code = ?error.code, "Migrating to datacenter");
                    session.set_default_dc(dc);
                }
                ErrorAction::Restart => {
                    tracing::debug!(method, attempt, code = ?error.code, "Auth restart, retrying");
                }
                ErrorAction::RateLimited(wait) => match self.config.flood_policy {
                    FloodPolicy::Backoff => {
                        tracing::warn!(
                            method,
                            seconds = wait.as_secs(),
                            code = ?error.code,
                            "Rate limited, backing off"
                        );
                        tokio::time::sleep(wait + FLOOD_WAIT_SLACK).await;
                    }
                    FloodPolicy::Fail => {
                        return Err(RequestError::FloodWait {
                            seconds: wait.as_secs(),
                        });
                    }
                },
                ErrorAction::Fatal(message) => {
                    tracing::debug!(method, attempt, code = ?error.code, "Request failed: {message}");
                    return Err(RequestError::Remote(message));
                }
            }
        };

        // Best-effort spacing against self-inflicted flood waits.
        tokio::time::sleep(self.config.request_spacing()).await;
        Ok(response)
    }
}
