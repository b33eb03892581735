//! CLI command implementations

pub mod apply;
pub mod delete;
pub mod events;
pub mod get;
pub mod port_forward;
pub mod route;
pub mod scale;
