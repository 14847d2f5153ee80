//! Classification of remote errors into recovery actions.
//!
//! The remote overloads one error channel for transient infrastructure
//! conditions and for rate limits. The markers below are part of the wire
//! contract and are matched on the error text exactly as sent.

use std::time::Duration;

/// Marker of a datacenter migration, followed by the target id.
pub const MIGRATE_MARKER: &str = "_MIGRATE_";
/// Exact message of a session restart.
pub const AUTH_RESTART: &str = "AUTH_RESTART";
/// Marker of a rate limit.
pub const FLOOD_WAIT_MARKER: &str = "FLOOD_WAIT";
const WAIT_SEPARATOR: &str = "_WAIT_";

/// What to do after a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorAction {
    /// Switch to the given datacenter and retry.
    Migrate(u32),
    /// Retry unchanged.
    Restart,
    /// Rate limited for the given duration.
    RateLimited(Duration),
    /// Not recoverable; carries the original message.
    Fatal(String),
}

impl ErrorAction {
    /// Classify a remote error message.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        if let Some((_, dc)) = message.split_once(MIGRATE_MARKER) {
            return dc
                .parse()
                .map_or_else(|_| Self::Fatal(message.to_string()), Self::Migrate);
        }

        if message == AUTH_RESTART {
            return Self::Restart;
        }

        if message.contains(FLOOD_WAIT_MARKER) {
            return message
                .split_once(WAIT_SEPARATOR)
                .and_then(|(_, seconds)| seconds.parse().ok())
                .map_or_else(
                    || Self::Fatal(message.to_string()),
                    |seconds| Self::RateLimited(Duration::from_secs(seconds)),
                );
        }

        Self::Fatal(message.to_string())
    }
}
