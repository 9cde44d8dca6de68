//! Session coordination: membership, presence, host grace periods,
//! readiness and command fan-out.

pub mod barrier;
pub mod debounce;
pub mod grace;
pub mod liveness;
pub mod presence;
pub mod registry;
pub mod state;

pub use registry::{RegistryConfig, SessionRegistry};
