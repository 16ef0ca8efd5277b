//! Service control backend contract (spec.md §6, §4.10 admin/service
//! control surface): enumerate backend services and start/stop/restart
//! them, plus reset a circuit breaker. The real control plane is out of
//! scope (spec.md §1); this in-memory fake gives the admin endpoint
//! something real to drive.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Running,
    Stopped,
    Restarting,
    CircuitOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub error_count: u64,
}

#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn get_all_services(&self) -> Vec<ServiceStatus>;
    async fn get_service(&self, name: &str) -> Option<ServiceStatus>;
    async fn start(&self, name: &str) -> Result<(), String>;
    async fn stop(&self, name: &str) -> Result<(), String>;
    async fn restart(&self, name: &str) -> Result<(), String>;
    async fn reset_circuit_breaker(&self, name: &str) -> Result<(), String>;
}

#[derive(Clone, Default)]
pub struct InMemoryServiceControl {
    services: Arc<DashMap<String, ServiceStatus>>,
}

impl InMemoryServiceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str) {
        self.services.insert(
            name.to_string(),
            ServiceStatus {
                name: name.to_string(),
                state: ServiceState::Running,
                error_count: 0,
            },
        );
    }

    fn set_state(&self, name: &str, state: ServiceState) -> Result<(), String> {
        let mut entry = self.services.get_mut(name).ok_or_else(|| format!("unknown service: {name}"))?;
        entry.state = state;
        Ok(())
    }
}

#[async_trait]
impl ServiceControl for InMemoryServiceControl {
    async fn get_all_services(&self) -> Vec<ServiceStatus> {
        self.services.iter().map(|entry| entry.value().clone()).collect()
    }

    async fn get_service(&self, name: &str) -> Option<ServiceStatus> {
        self.services.get(name).map(|entry| entry.value().clone())
    }

    async fn start(&self, name: &str) -> Result<(), String> {
        self.set_state(name, ServiceState::Running)
    }

    async fn stop(&self, name: &str) -> Result<(), String> {
        self.set_state(name, ServiceState::Stopped)
    }

    async fn restart(&self, name: &str) -> Result<(), String> {
        self.set_state(name, ServiceState::Restarting)?;
        self.set_state(name, ServiceState::Running)
    }

    async fn reset_circuit_breaker(&self, name: &str) -> Result<(), String> {
        let mut entry = self.services.get_mut(name).ok_or_else(|| format!("unknown service: {name}"))?;
        entry.state = ServiceState::Running;
        entry.error_count = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_transitions_update_state() {
        let control = InMemoryServiceControl::new();
        control.register("market-data");

        control.stop("market-data").await.unwrap();
        assert_eq!(control.get_service("market-data").await.unwrap().state, ServiceState::Stopped);

        control.restart("market-data").await.unwrap();
        assert_eq!(control.get_service("market-data").await.unwrap().state, ServiceState::Running);
    }

    #[tokio::test]
    async fn unknown_service_errors() {
        let control = InMemoryServiceControl::new();
        assert!(control.start("ghost").await.is_err());
    }

    #[tokio::test]
    async fn reset_circuit_breaker_clears_error_count() {
        let control = InMemoryServiceControl::new();
        control.register("wallet-sync");
        control.services.get_mut("wallet-sync").unwrap().error_count = 5;

        control.reset_circuit_breaker("wallet-sync").await.unwrap();
        let status = control.get_service("wallet-sync").await.unwrap();
        assert_eq!(status.error_count, 0);
        assert_eq!(status.state, ServiceState::Running);
    }
}
