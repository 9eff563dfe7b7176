pub mod constants;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use events::{EngineEvent, EventLog, EventRecord};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
