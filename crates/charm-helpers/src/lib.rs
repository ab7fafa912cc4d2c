//! Building blocks for Juju charms written in Rust.
//!
//! - [`hookenv`] talks to the orchestration platform through the hook tools.
//! - [`relation`] gives relation settings a typed shape.
//! - [`hooks`] maps hook names to handlers.
//! - [`host`] installs packages and controls system services.
//! - [`logging`] sets up `tracing`.

pub mod command;
pub mod hookenv;
pub mod hooks;
pub mod host;
pub mod logging;
pub mod relation;
