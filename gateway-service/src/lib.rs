//! gateway-service: the concrete real-time gateway binary built on
//! `gateway-core` (spec.md §1, components C8 and C10).
//!
//! Split into a library (this crate root) and a thin `main.rs` so the
//! crate's own integration tests can exercise the wired-up endpoints and
//! backend fakes without going through a spawned process.

pub mod backend;
pub mod endpoints;
pub mod http_middleware;
pub mod wiring;
