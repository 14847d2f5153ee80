//! Connection lifecycle and subscriptions for the channel client.
//!
//! Provides:
//! - `ConnectionManager` - owns the live transport session and its update pump
//! - `SubscriptionRegistry` - one subscriber queue per channel

pub mod manager;
pub mod registry;

pub use manager::{ConnectionManager, SessionError, SessionState};
pub use registry::{BatchReceiver, DispatchOutcome, RegistryError, SubscriptionRegistry};
