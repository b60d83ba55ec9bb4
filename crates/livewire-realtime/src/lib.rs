//! Client-side realtime coordination core.
//!
//! Multiplexes many logical subscriptions onto one shared [`Transport`]
//! connection:
//!
//! - [`ChannelRegistry`]: topic to channel mapping, ref-counted subscribe/unsubscribe
//! - [`EventStream`]: typed row-change and broadcast delivery per topic
//! - [`PresenceTracker`]: merged peer presence with heartbeats and lazy staleness
//! - [`ReconnectionSupervisor`]: backoff reconnect and resubscription
//!
//! [`Realtime`] wires them together around a transport. Everything is
//! constructed explicitly; there are no process-wide singletons.

pub mod bridge;
pub mod client;
pub mod error;
pub mod event;
pub mod memory;
pub mod phoenix;
pub mod presence;
pub mod registry;
pub mod stream;
pub mod supervisor;
pub mod transport;

pub use bridge::invalidate_on_change;
pub use client::Realtime;
pub use error::{RealtimeError, RealtimeResult, TransportError};
pub use event::{BroadcastMessage, ChangeEvent, ChangeFilter, ChangeOperation, ChannelEvent};
pub use memory::MemoryTransport;
pub use phoenix::PhoenixTransport;
pub use presence::{PresenceEntry, PresenceState, PresenceTracker};
pub use registry::{
    ChannelId, ChannelRegistry, ChannelState, ChannelStatus, SubscriberHandle, SubscriberId,
};
pub use stream::{EventStream, ListenerId};
pub use supervisor::{Backoff, ReconnectionSupervisor, SupervisorStatus};
pub use transport::{
    ChangeFeed, ChannelOptions, ConnectionStatus, InboundMessage, PeerUpdate, PresenceMessage,
    Transport,
};
