//! Types shared by the console client crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
