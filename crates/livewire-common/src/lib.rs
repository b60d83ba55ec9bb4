pub mod errors;
pub mod id;
pub mod logging;

pub use errors::{ConfigError, LivewireError};
pub use id::{new_correlation_id, new_id, ClientId};
pub use logging::init_tracing;

pub type Result<T> = std::result::Result<T, LivewireError>;
