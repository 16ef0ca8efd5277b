//! Endpoint Specializations (C8, spec.md §4.8): thin configuration +
//! hook structs over the shared `gateway-core` engine.

pub mod admin;
pub mod cache;
pub mod contest;
pub mod market;
pub mod monitor;
pub mod portfolio;
pub mod terminal;
pub mod test_echo;
pub mod wallet;

pub use admin::AdminEndpoint;
pub use contest::ContestEndpoint;
pub use market::MarketEndpoint;
pub use monitor::MonitorEndpoint;
pub use portfolio::PortfolioEndpoint;
pub use terminal::TerminalEndpoint;
pub use test_echo::TestEchoEndpoint;
pub use wallet::WalletEndpoint;
