//! Device and observer integrations.
//!
//! Everything here plugs into the engine through the traits in
//! [`crate::engine::device`] or by subscribing to the event bus. The HTTP
//! pollers are behind the `integration_http` feature so the core controller
//! builds without a TLS stack.

pub mod datalog;
pub mod loopback;

#[cfg(feature = "integration_http")]
pub mod presence;
#[cfg(feature = "integration_http")]
pub mod sensor;
#[cfg(feature = "integration_http")]
pub mod weather;
