//! Core abstractions for the channel client.
//!
//! This crate provides the fundamental building blocks:
//! - Wire model of pushed updates and the derived `Message`/`MessageBatch` views
//! - `TransportSession`/`TransportConnector` - the transport boundary
//! - `demux` - pure normalization of updates into per-channel batches
//! - `loopback` - scripted in-memory transport (feature: loopback)

pub mod demux;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod traits;
pub mod types;

pub use traits::{
    TransportConfig, TransportConnector, TransportError, TransportEvent, TransportHandle,
    TransportSession,
};
pub use types::{
    AuthKeys, ChannelId, Message, MessageBatch, MessageId, Peer, RawMessage, RawUpdates, RawUser,
    Update, User, UserId,
};
