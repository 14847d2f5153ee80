//! Resilient request execution for the channel client.
//!
//! Provides:
//! - `ErrorAction` - classification of remote error markers
//! - `RequestExecutor` - retry loop with flood-wait policy and request spacing

pub mod executor;
pub mod retry;

pub use executor::{ExecutorConfig, FloodPolicy, RequestError, RequestExecutor};
pub use retry::ErrorAction;
