//! Console client session
//!
//! Wires the credential store, request pipeline and notification stream
//! together from one TOML configuration. The stream follows the credential:
//! it connects when a token appears and disconnects when it is cleared.

pub mod config;
pub mod error;
pub mod session;
pub mod telemetry;

pub use config::{Config, StorageConfig, StreamSettings};
pub use error::{Error, Result};
pub use session::ConsoleSession;
