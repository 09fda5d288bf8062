//! Service configuration.
//!
//! Configuration is an explicit value built once at startup and handed to
//! the executor, the diagnosis client and the server. Nothing reads the
//! environment after that point.

pub mod types;
pub mod loader;

pub use types::*;
pub use loader::*;
