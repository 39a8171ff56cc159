//! Redfire B2BUA - signaling back-to-back user agent engine
//!
//! Bridges an answering call leg to one originating leg at a time, hunting
//! through authorized routes, with accounting, media relay binding and an
//! administrative command interface.
//!
//! **Sponsored by [Carrier One Inc](https://carrierone.com) - Professional Telecommunications Solutions**

pub mod config;
pub mod core;
pub mod protocols;
pub mod interfaces;
pub mod services;
pub mod error;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Engine version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
