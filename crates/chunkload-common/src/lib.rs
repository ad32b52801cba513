//! Chunkload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, environment helpers and logging setup for the
//! chunkload workspace.
//!
//! # Example
//!
//! ```no_run
//! use chunkload_common::env::parse_var_or;
//! use chunkload_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let port: u16 = parse_var_or("CHUNKLOAD_PORT", 8080)?;
//!     tracing::info!(port, "configured");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
