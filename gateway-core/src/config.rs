//! Configuration management using Figment.
//!
//! Configuration is loaded from multiple sources with the following
//! precedence (highest to lowest):
//! 1. Environment variables (prefix: `GW_`)
//! 2. Current working directory: `./config.toml`
//! 3. Default values
//!
//! Grounded on the teacher's `acton-service::config` module; trimmed to
//! the knobs this gateway actually has (no database/redis/nats/otlp/grpc
//! sections — those backends are out of scope, see DESIGN.md).

use std::collections::HashMap;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::auth::verifier::AuthMode;
use crate::error::Result;

/// Top-level configuration shared by every binary built on this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub jwt: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            jwt: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            endpoints: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration for a specific service name. Environment
    /// variables (`GW_` prefix) always win over `./config.toml`, which
    /// wins over the compiled-in defaults.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        tracing::debug!(service = service_name, "loading configuration");

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("GW_").split("__"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file, bypassing the default
    /// discovery path. Useful for tests and non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("GW_").split("__"));

        let config = figment.extract()?;
        Ok(config)
    }
}

/// Service-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            port: default_port(),
            log_level: default_log_level(),
            allowed_origins: Vec::new(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_service_name() -> String {
    "realtime-gateway".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

/// Static-secret JWT verification configuration (spec.md §4.2, §6).
///
/// Deliberately narrower than the teacher's `JwtConfig`: no public-key
/// path, no RS256/ES256, no issuer/audience — the gateway only verifies
/// tokens issued elsewhere against one shared HS256 secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub signing_secret: String,
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_secret: "dev-only-insecure-secret-change-me".to_string(),
            admin_roles: default_admin_roles(),
        }
    }
}

fn default_admin_roles() -> Vec<String> {
    vec!["admin".to_string(), "superadmin".to_string()]
}

/// Fixed-budget rate limiting (SPEC_FULL.md §4.3 / spec.md §9 Open
/// Question): a frame budget decremented per inbound message, reset by
/// a single process-wide timer every `window_secs` — no token-bucket
/// refill, unlike the teacher's `governor`-backed limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_budget_per_window")]
    pub budget_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            budget_per_window: default_budget_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_budget_per_window() -> u32 {
    120
}

fn default_window_secs() -> u64 {
    60
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Heartbeat timing (spec.md §4.3): a ping cadence, a separate pong
/// grace window, and a tolerance of missed pongs before the connection
/// is treated as dead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_missed_tolerance")]
    pub missed_tolerance: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            missed_tolerance: default_missed_tolerance(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_missed_tolerance() -> u32 {
    3
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-endpoint configuration (spec.md §3: "EndpointConfig (static, per
/// endpoint)"). `rate_limit_per_minute`/`heartbeat_interval_secs`/
/// `heartbeat_timeout_secs` override the service-wide defaults in
/// [`RateLimitConfig`]/[`HeartbeatConfig`] when set. The rate-limit reset
/// and heartbeat sweep loops each still run as a single process-wide
/// timer (spec.md §4.3), but resolve and store each connection's own
/// interval/timeout/budget at connect time (`engine::base::run_connection`)
/// so the sweep can apply per-connection values on every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    #[serde(default)]
    pub required_role: Option<String>,
    #[serde(default)]
    pub public_channels: Vec<String>,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
    #[serde(default)]
    pub heartbeat_timeout_secs: Option<u64>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            auth_required: false,
            auth_mode: default_auth_mode(),
            required_role: None,
            public_channels: Vec::new(),
            max_payload_bytes: default_max_payload_bytes(),
            rate_limit_per_minute: None,
            heartbeat_interval_secs: None,
            heartbeat_timeout_secs: None,
        }
    }
}

impl EndpointConfig {
    pub fn resolved_rate_limit(&self, defaults: &RateLimitConfig) -> u32 {
        self.rate_limit_per_minute.unwrap_or(defaults.budget_per_window)
    }

    pub fn resolved_heartbeat_interval(&self, defaults: &HeartbeatConfig) -> Duration {
        self.heartbeat_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| defaults.interval())
    }

    pub fn resolved_heartbeat_timeout(&self, defaults: &HeartbeatConfig) -> Duration {
        self.heartbeat_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| defaults.timeout())
    }
}

fn default_auth_mode() -> AuthMode {
    AuthMode::Auto
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.heartbeat.missed_tolerance, 3);
        assert!(config.heartbeat.timeout() < config.heartbeat.interval());
    }

    #[test]
    fn endpoint_overrides_win_over_heartbeat_defaults() {
        let defaults = HeartbeatConfig::default();
        let endpoint = EndpointConfig {
            heartbeat_interval_secs: Some(5),
            heartbeat_timeout_secs: Some(2),
            ..Default::default()
        };
        assert_eq!(endpoint.resolved_heartbeat_interval(&defaults), Duration::from_secs(5));
        assert_eq!(endpoint.resolved_heartbeat_timeout(&defaults), Duration::from_secs(2));

        let unset = EndpointConfig::default();
        assert_eq!(unset.resolved_heartbeat_interval(&defaults), defaults.interval());
        assert_eq!(unset.resolved_heartbeat_timeout(&defaults), defaults.timeout());
    }

    #[test]
    fn rate_limit_window_converts_to_duration() {
        let rl = RateLimitConfig::default();
        assert_eq!(rl.window(), Duration::from_secs(60));
    }
}
