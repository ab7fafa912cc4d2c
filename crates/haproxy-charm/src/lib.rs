//! HAProxy charm: reconciles statically configured services with the backend servers announced
//! by related units and renders the result as `haproxy.cfg`.
//!
//! The pipeline of one hook invocation is
//! [`charm::Charm::reconcile_context`] → [`registry::build_registry`] →
//! [`render::render_config`], followed by writing the file, reconciling the opened
//! [`ports`] and reloading HAProxy.

pub mod charm;
pub mod cli;
pub mod config;
pub mod deployed;
pub mod ports;
pub mod registry;
pub mod render;
pub mod service;
