//! climated: a residential climate control daemon.
//!
//! The [`engine`] module holds the controller and the subsumption policy
//! engine; [`integrations`] the device transports and observers; [`api`] the
//! HTTP surface; [`shell`] the interactive operator console.

pub mod api;
pub mod config;
pub mod engine;
pub mod integrations;
pub mod shell;
