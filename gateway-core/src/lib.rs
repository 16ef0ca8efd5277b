//! gateway-core: the connection-and-subscription engine shared by every
//! real-time gateway endpoint (spec.md §1, components C1-C7 and C9).
//!
//! This crate is the reusable "abstract base": frame transport, auth
//! verification, rate limiting & heartbeat, the client and channel
//! registries, the connection state machine, the internal event bus, and
//! metrics. Concrete endpoints (market data, wallet, portfolio, contest,
//! monitor, terminal, admin, ...) are thin specializations built on top of
//! this crate's [`engine::endpoint::Endpoint`] trait, living in the
//! `gateway-service` binary crate.

pub mod auth;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod observability;

pub use error::{Error, Result};
