//! # Keel Ingress
//!
//! Maps external (host, path) requests to declared services.
//!
//! [`IngressRouter`] compiles the IngressRule resources into a per-host
//! table and answers two questions: which rule wins (`route`, longest
//! segment-boundary prefix, first-declared on ties) and where to send the
//! request right now (`resolve`, one Ready endpoint via the service
//! registry). A matched rule with no live endpoint is ServiceUnavailable;
//! an uncovered (host, path) is NoMatchingRule.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod router;

pub use error::{IngressError, Result};
pub use router::{IngressRouter, ResolvedRoute, RouteDecision};
