//! Peer-pod VM lifecycle service.
//!
//! Receives CreateVM / StartVM / StopVM calls from a container runtime,
//! boots one cloud VM per pod sandbox and bridges the runtime to the agent
//! running inside it.

pub mod config;
pub mod sandbox;
pub mod server;
