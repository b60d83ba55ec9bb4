//! Phoenix-channels WebSocket transport (Supabase Realtime wire format, v1
//! JSON envelopes).

mod connection;
mod handler;
mod types;

pub use connection::PhoenixTransport;
pub use types::PhoenixMessage;
