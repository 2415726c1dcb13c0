//! The shared assignment registry
//!
//! A small HTTP service with get/merge-set semantics on the monitor →
//! cache-group-list map, plus the CDN snapshot and monitoring metadata the
//! fleet plans against. Monitors are the only writers, and only through the
//! partial-merge POST.

pub mod client;
pub mod server;

pub use client::RegistryClient;
pub use server::{RegistrySeed, RegistryServer, RegistryState};
