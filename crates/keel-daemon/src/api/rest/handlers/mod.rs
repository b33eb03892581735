//! API request handlers

mod events;
mod health;
mod ingress;
mod instances;
mod reconciler;
mod resources;
mod services;
mod workloads;

pub use events::*;
pub use health::*;
pub use ingress::*;
pub use instances::*;
pub use reconciler::*;
pub use resources::*;
pub use services::*;
pub use workloads::*;
