//! Pub/sub transport for the gridlink energy-market client.
//!
//! Provides:
//! - A dyn-compatible [`Transport`] trait (publish + pattern subscribe)
//! - [`RedisTransport`] backed by a multiplexed Redis connection
//! - [`MemoryTransport`], an in-process broker for tests and demos
//! - Channel naming ([`ChannelLayout`]) and glob pattern matching
//! - Inbound decoding into the tagged [`Event`] type and outbound
//!   [`OutboundMessage`] encoding

pub mod channels;
pub mod error;
pub mod memory;
pub mod message;
pub mod pattern;
pub mod redis_transport;
pub mod transport;

pub use channels::ChannelLayout;
pub use error::{BusError, BusResult};
pub use memory::{MemoryTransport, PublishedMessage};
pub use message::{
    decode_event, CommandResponse, DecodeError, Event, EventPayload, MarketCycle,
    OutboundMessage, SelectionNotice,
};
pub use pattern::{escape_glob, glob_match};
pub use redis_transport::{RedisConfig, RedisTransport};
pub use transport::{BoxFuture, DynTransport, MessageStream, RawMessage, Transport};
