//! Backend service contracts (spec.md §6) and the in-memory fakes that
//! stand in for them.
//!
//! The backend domain services (market-data aggregator, balance tracker,
//! contest engine, the persistent store, service control) are explicitly
//! out of scope (spec.md §1): this crate only consumes their contracts.
//! Each trait here is the narrow read interface the gateway actually
//! calls; the in-memory implementation exists so the crate's endpoints
//! and integration tests have something real to run against.

pub mod balance_provider;
pub mod persistent_store;
pub mod service_control;
pub mod token_catalog;

pub use balance_provider::{BalanceProvider, InMemoryBalanceProvider};
pub use persistent_store::{InMemoryPersistentStore, PersistentStore, TradeRecord, UserRecord};
pub use service_control::{InMemoryServiceControl, ServiceControl, ServiceState, ServiceStatus};
pub use token_catalog::{InMemoryTokenCatalog, TokenCatalog, TokenRecord};
