//! Keel daemon library
//!
//! Components of the `keeld` background orchestration daemon:
//! - REST API handlers and router
//! - Server lifecycle (control loops, garbage collection, shutdown)
//! - Configuration loading

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use server::Server;
