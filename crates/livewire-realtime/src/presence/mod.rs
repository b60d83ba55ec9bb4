//! Peer presence: who is on a topic right now.
//!
//! [`PresenceState`] is the pure merge logic; [`PresenceTracker`] owns one
//! state per live channel plus this client's own heartbeat.

mod heartbeat;
mod state;
mod tracker;

pub use state::{PresenceEntry, PresenceState};
pub use tracker::PresenceTracker;
