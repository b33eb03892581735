//! # Keel Reconciler
//!
//! Drives running instances toward declared workload specs.
//!
//! A [`ReconcilerSupervisor`] follows the store's change feeds and runs one
//! worker task per workload name. Each pass diffs desired against observed:
//! resolve the env through the [`Materializer`] (pinning the generations it
//! read), start missing instances through the [`ContainerRuntime`], retire
//! excess ones oldest-first, and publish the workload's phase. Failures
//! consume a per-generation retry budget with jittered exponential backoff;
//! an exhausted budget parks the workload in Degraded until a new
//! generation is applied.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod backoff;
pub mod error;
pub mod materializer;
pub mod runtime;
pub mod supervisor;
mod worker;

pub use backoff::BackoffConfig;
pub use error::{MaterializeError, ReconcileError, RuntimeError};
pub use materializer::{MaterializedEnv, Materializer};
pub use runtime::{ContainerRuntime, RuntimeHandle, SimulatedRuntime};
pub use supervisor::{ReconcilerConfig, ReconcilerSupervisor};
