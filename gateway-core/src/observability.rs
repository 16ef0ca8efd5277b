//! Structured logging setup.
//!
//! Grounded on the teacher's `observability::init_tracing`; the
//! OpenTelemetry meter-provider branch is dropped (no OTel exporter is
//! in scope, see DESIGN.md) leaving the plain JSON `tracing-subscriber`
//! path the teacher already falls back to.

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;

pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(service = %config.service.name, "tracing initialized");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic_on_default_config() {
        let config = Config::default();
        let _ = init_tracing(&config);
    }
}
