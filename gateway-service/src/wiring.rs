//! Assembles the shared engine state, the backend fakes, and every
//! endpoint specialization into one `axum::Router`. Split out from
//! `main.rs` so the crate's integration tests can build the same
//! wiring in-process.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::RawQuery;
use axum::http::HeaderMap;
use axum::routing::{get, MethodRouter};
use axum::Router;
use tokio_util::sync::CancellationToken;

use gateway_core::auth::verifier::AuthVerifier;
use gateway_core::bus::{Event, EventBus, EventName};
use gateway_core::config::{Config, EndpointConfig};
use gateway_core::engine::broadcast::ChannelRegistry;
use gateway_core::engine::endpoint::{Endpoint, GatewayContext};
use gateway_core::engine::registry::ClientRegistry;
use gateway_core::engine::transport;
use gateway_core::engine::{heartbeat, rate_limiter};
use gateway_core::metrics::Metrics;

use crate::backend::{InMemoryBalanceProvider, InMemoryPersistentStore, InMemoryServiceControl, InMemoryTokenCatalog};
use crate::endpoints::{
    AdminEndpoint, ContestEndpoint, MarketEndpoint, MonitorEndpoint, PortfolioEndpoint, TerminalEndpoint, TestEchoEndpoint, WalletEndpoint,
};
use crate::http_middleware;

/// Every backend fake and concrete endpoint the service wires up,
/// reachable from tests as well as `main`.
pub struct Services {
    pub config: Config,
    pub ctx: GatewayContext,
    pub auth: Arc<AuthVerifier>,

    pub persistent_store: Arc<InMemoryPersistentStore>,
    pub token_catalog: Arc<InMemoryTokenCatalog>,
    pub balance_provider: Arc<InMemoryBalanceProvider>,
    pub service_control: Arc<InMemoryServiceControl>,

    pub market: Arc<MarketEndpoint>,
    pub wallet: Arc<WalletEndpoint>,
    pub portfolio: Arc<PortfolioEndpoint>,
    pub monitor: Arc<MonitorEndpoint>,
    pub admin: Arc<AdminEndpoint>,
    pub terminal: Arc<TerminalEndpoint>,
    pub contest: Arc<ContestEndpoint>,
    pub test_echo: Arc<TestEchoEndpoint>,

    pub cancel: CancellationToken,
}

fn endpoint_config(config: &Config, name: &str, default_path: &str, auth_required: bool, public_channels: &[&str]) -> EndpointConfig {
    config.endpoints.get(name).cloned().unwrap_or_else(|| EndpointConfig {
        path: default_path.to_string(),
        auth_required,
        public_channels: public_channels.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    })
}

/// Build every shared service and endpoint, running each endpoint's
/// `on_init` hook (spec.md §4.8: "called once when the endpoint is
/// registered, before it accepts any connections").
pub async fn build_services(config: Config) -> Services {
    let clients = Arc::new(ClientRegistry::new());
    let channels = Arc::new(ChannelRegistry::new());
    let bus = Arc::new(EventBus::new());
    let metrics = Arc::new(Metrics::new());

    let persistent_store = Arc::new(InMemoryPersistentStore::new());
    let token_catalog = Arc::new(InMemoryTokenCatalog::new());
    let balance_provider = Arc::new(InMemoryBalanceProvider::new());
    let service_control = Arc::new(InMemoryServiceControl::new());

    let auth = Arc::new(AuthVerifier::new(&config.jwt, persistent_store.clone()));

    let ctx = GatewayContext {
        clients,
        channels,
        bus,
        metrics,
        rate_limit_defaults: config.rate_limit.clone(),
        heartbeat_defaults: config.heartbeat.clone(),
    };

    let market = Arc::new(MarketEndpoint::new(
        endpoint_config(&config, "market", "/ws/market", false, &["public.tokens", "public.market"]),
        token_catalog.clone(),
    ));
    let wallet = Arc::new(WalletEndpoint::new(
        endpoint_config(&config, "wallet", "/ws/wallet", true, &[]),
        balance_provider.clone(),
    ));
    let portfolio = Arc::new(PortfolioEndpoint::new(
        endpoint_config(&config, "portfolio", "/ws/portfolio", true, &[]),
        persistent_store.clone(),
    ));
    let monitor = Arc::new(MonitorEndpoint::new(endpoint_config(
        &config,
        "monitor",
        "/ws/monitor",
        false,
        &["public.background_scene"],
    )));
    let admin = Arc::new(AdminEndpoint::new(
        endpoint_config(&config, "admin", "/ws/admin", true, &[]),
        service_control.clone(),
    ));
    let terminal = Arc::new(TerminalEndpoint::new(endpoint_config(
        &config,
        "terminal",
        "/ws/terminal",
        false,
        &["public.terminal"],
    )));
    let contest = Arc::new(ContestEndpoint::new(endpoint_config(
        &config,
        "contest",
        "/ws/contest",
        false,
        &["public.contests"],
    )));
    let test_echo = Arc::new(TestEchoEndpoint::new(endpoint_config(&config, "test", "/ws/test", false, &[])));

    for endpoint in [
        market.clone() as Arc<dyn Endpoint>,
        wallet.clone() as Arc<dyn Endpoint>,
        portfolio.clone() as Arc<dyn Endpoint>,
        monitor.clone() as Arc<dyn Endpoint>,
        admin.clone() as Arc<dyn Endpoint>,
        terminal.clone() as Arc<dyn Endpoint>,
        contest.clone() as Arc<dyn Endpoint>,
        test_echo.clone() as Arc<dyn Endpoint>,
    ] {
        if let Err(e) = endpoint.on_init(&ctx).await {
            tracing::error!(error = %e, path = endpoint.config().path, "endpoint on_init failed");
        }
    }

    Services {
        config,
        ctx,
        auth,
        persistent_store,
        token_catalog,
        balance_provider,
        service_control,
        market,
        wallet,
        portfolio,
        monitor,
        admin,
        terminal,
        contest,
        test_echo,
        cancel: CancellationToken::new(),
    }
}

fn websocket_route(endpoint: Arc<dyn Endpoint>, ctx: GatewayContext, auth: Arc<AuthVerifier>) -> MethodRouter {
    get(move |ws: WebSocketUpgrade, headers: HeaderMap, RawQuery(query): RawQuery| {
        let endpoint = endpoint.clone();
        let ctx = ctx.clone();
        let auth = auth.clone();
        async move { transport::accept(ws, headers, query.unwrap_or_default(), endpoint, ctx, auth) }
    })
}

/// Build the axum router, one route per endpoint path, wrapped in the
/// ambient HTTP middleware stack (spec.md's Non-goals exclude nothing
/// here: request tracing and panic recovery are carried regardless,
/// per the teacher's `Server::serve`).
pub fn router(services: &Services) -> Router {
    let mut app = Router::new();
    let endpoints: Vec<Arc<dyn Endpoint>> = vec![
        services.market.clone(),
        services.wallet.clone(),
        services.portfolio.clone(),
        services.monitor.clone(),
        services.admin.clone(),
        services.terminal.clone(),
        services.contest.clone(),
        services.test_echo.clone(),
    ];
    for endpoint in endpoints {
        let path = endpoint.config().path.clone();
        app = app.route(&path, websocket_route(endpoint, services.ctx.clone(), services.auth.clone()));
    }

    app.layer(http_middleware::cors_layer(&services.config.service.allowed_origins))
        .layer(http_middleware::trace_layer())
        .layer(http_middleware::sensitive_headers_layer())
        .layer(http_middleware::request_id_propagation_layer())
        .layer(http_middleware::request_id_layer())
        .layer(http_middleware::catch_panic_layer())
}

/// Spawn the process-wide rate-limit reset and heartbeat sweep loops,
/// plus the periodic metrics snapshot publisher (spec.md §4.9), all
/// cancelled together via `services.cancel`.
pub fn spawn_background_loops(services: &Services) {
    tokio::spawn(rate_limiter::run_reset_loop(
        services.ctx.clients.clone(),
        services.config.rate_limit.clone(),
        services.cancel.clone(),
    ));
    tokio::spawn(heartbeat::run_heartbeat_loop(
        services.ctx.clients.clone(),
        services.config.heartbeat.clone(),
        services.ctx.metrics.clone(),
        services.cancel.clone(),
    ));

    let bus = services.ctx.bus.clone();
    let metrics = services.ctx.metrics.clone();
    let cancel = services.cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(15));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = metrics.snapshot();
                    bus.publish(Event::new(
                        EventName::ServiceStatusUpdate,
                        serde_json::json!({ "name": "gateway", "metrics": snapshot }),
                    ));
                }
            }
        }
    });
}

/// Quiesce every endpoint's background work (spec.md §9: "the core
/// guarantees `on_cleanup` runs") and stop the shared loops.
pub async fn shutdown(services: &Services) {
    services.cancel.cancel();
    for endpoint in [
        services.market.clone() as Arc<dyn Endpoint>,
        services.wallet.clone() as Arc<dyn Endpoint>,
        services.portfolio.clone() as Arc<dyn Endpoint>,
        services.monitor.clone() as Arc<dyn Endpoint>,
        services.admin.clone() as Arc<dyn Endpoint>,
        services.terminal.clone() as Arc<dyn Endpoint>,
        services.contest.clone() as Arc<dyn Endpoint>,
        services.test_echo.clone() as Arc<dyn Endpoint>,
    ] {
        endpoint.on_cleanup(&services.ctx).await;
    }
}
