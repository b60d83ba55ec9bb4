//! Configuration schema types for Livewire.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod cache;
mod logging;
mod presence;
mod realtime;
mod reconnect;

pub use cache::*;
pub use logging::*;
pub use presence::*;
pub use realtime::*;
pub use reconnect::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LivewireConfig {
    pub realtime: RealtimeConfig,
    pub presence: PresenceConfig,
    pub reconnect: ReconnectConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}
